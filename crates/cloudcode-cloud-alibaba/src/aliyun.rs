//! aliyun CLI wrapper
//!
//! Wraps RPC-style `aliyun <product> <Action> --Param value` calls. Credentials
//! are handed to the child process through its environment so they never
//! appear on the command line.

use crate::error::{AlibabaError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::process::Command;

/// Products the deployment talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    Ecs,
    Vpc,
    Sts,
}

impl Product {
    fn as_str(&self) -> &'static str {
        match self {
            Product::Ecs => "ecs",
            Product::Vpc => "vpc",
            Product::Sts => "sts",
        }
    }
}

/// aliyun CLI wrapper
pub struct Aliyun {
    access_key_id: String,
    access_key_secret: String,
    region: String,
}

impl Aliyun {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Check that the CLI is installed
    pub async fn ensure_installed(&self) -> Result<()> {
        let which = Command::new("which").arg("aliyun").output().await?;
        if !which.status.success() {
            return Err(AlibabaError::CliNotFound);
        }
        Ok(())
    }

    /// Run an API action and decode its JSON response
    pub async fn call<T: DeserializeOwned>(
        &self,
        product: Product,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let output = self.run_command(product, action, params).await?;
        serde_json::from_str(&output).map_err(|e| AlibabaError::UnexpectedResponse {
            action: action.to_string(),
            message: e.to_string(),
        })
    }

    /// Run an API action, ignoring its response body
    pub async fn call_unit(
        &self,
        product: Product,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<()> {
        self.run_command(product, action, params).await?;
        Ok(())
    }

    async fn run_command(
        &self,
        product: Product,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<String> {
        let mut cmd = Command::new("aliyun");
        cmd.arg(product.as_str()).arg(action);
        for (key, value) in params {
            cmd.arg(format!("--{}", key)).arg(value);
        }
        cmd.env("ALIBABA_CLOUD_ACCESS_KEY_ID", &self.access_key_id);
        cmd.env("ALIBABA_CLOUD_ACCESS_KEY_SECRET", &self.access_key_secret);
        cmd.env("ALIBABA_CLOUD_REGION_ID", &self.region);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            "Running: aliyun {} {} {}",
            product.as_str(),
            action,
            params
                .iter()
                .map(|(k, v)| format!("--{} {}", k, v))
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AlibabaError::CliNotFound
            } else {
                e.into()
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AlibabaError::CommandFailed {
                action: action.to_string(),
                code: parse_error_code(&message),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Extract the `ErrorCode` the CLI prints for rejected calls
pub fn parse_error_code(message: &str) -> Option<String> {
    message.lines().find_map(|line| {
        let line = line.trim();
        let rest = line
            .strip_prefix("ErrorCode:")
            .or_else(|| line.strip_prefix("\"Code\":"))?;
        let code = rest.trim().trim_matches(|c| c == '"' || c == ',').trim();
        if code.is_empty() {
            None
        } else {
            Some(code.to_string())
        }
    })
}

/// JSON array parameter, e.g. `["i-123"]`
pub fn json_list(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVpcResponse {
    pub vpc_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeVpcsResponse {
    pub vpcs: VpcList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcList {
    #[serde(default)]
    pub vpc: Vec<VpcItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcItem {
    pub vpc_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVSwitchResponse {
    #[serde(rename = "VSwitchId")]
    pub vswitch_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeZonesResponse {
    pub zones: ZoneList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneList {
    #[serde(default)]
    pub zone: Vec<ZoneItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneItem {
    pub zone_id: String,
    #[serde(default)]
    pub available_resource_creation: ResourceTypeList,
    #[serde(default)]
    pub available_instance_types: InstanceTypeList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceTypeList {
    #[serde(default)]
    pub resource_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeList {
    #[serde(default)]
    pub instance_types: Vec<String>,
}

impl ZoneItem {
    /// The zone accepts new instances, of `instance_type` when the zone
    /// publishes its type list
    pub fn can_host(&self, instance_type: &str) -> bool {
        let creates_instances = self
            .available_resource_creation
            .resource_types
            .iter()
            .any(|t| t == "Instance");
        let types = &self.available_instance_types.instance_types;
        creates_instances && (types.is_empty() || types.iter().any(|t| t == instance_type))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecurityGroupResponse {
    pub security_group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateKeyPairResponse {
    pub key_pair_name: String,
    pub private_key_body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateInstanceResponse {
    pub instance_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstancesResponse {
    pub instances: InstanceList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceList {
    #[serde(default)]
    pub instance: Vec<InstanceItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceItem {
    pub instance_id: String,
    pub status: String,
    #[serde(default)]
    pub vpc_attributes: Option<VpcAttributes>,
}

impl InstanceItem {
    pub fn private_ip(&self) -> Option<String> {
        self.vpc_attributes
            .as_ref()?
            .private_ip_address
            .ip_address
            .first()
            .cloned()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcAttributes {
    #[serde(default)]
    pub private_ip_address: IpAddressList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpAddressList {
    #[serde(default)]
    pub ip_address: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocateEipResponse {
    pub allocation_id: String,
    pub eip_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeEipAddressesResponse {
    pub eip_addresses: EipList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EipList {
    #[serde(default)]
    pub eip_address: Vec<EipItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EipItem {
    pub allocation_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeDisksResponse {
    pub disks: DiskList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskList {
    #[serde(default)]
    pub disk: Vec<DiskItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskItem {
    pub disk_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSnapshotResponse {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSnapshotsResponse {
    pub snapshots: SnapshotList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotList {
    #[serde(default)]
    pub snapshot: Vec<StatusItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateImageResponse {
    pub image_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeImagesResponse {
    pub images: ImageList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageList {
    #[serde(default)]
    pub image: Vec<StatusItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusItem {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account_id: String,
    #[serde(default)]
    pub arn: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_code() {
        let stderr = "ERROR: SDK.ServerError\nErrorCode: KeyPair.AlreadyExist\nRecommend: ...\nRequestId: 1\nMessage: The key pair already exist.";
        assert_eq!(
            parse_error_code(stderr).as_deref(),
            Some("KeyPair.AlreadyExist")
        );

        let json_body = "{\n  \"Code\": \"DependencyViolation\",\n  \"Message\": \"...\"\n}";
        assert_eq!(
            parse_error_code(json_body).as_deref(),
            Some("DependencyViolation")
        );

        assert_eq!(parse_error_code("connection reset"), None);
    }

    #[test]
    fn test_zone_can_host() {
        let json = r#"{
            "Zones": { "Zone": [
                { "ZoneId": "ap-southeast-1a",
                  "AvailableResourceCreation": { "ResourceTypes": ["Disk"] } },
                { "ZoneId": "ap-southeast-1b",
                  "AvailableResourceCreation": { "ResourceTypes": ["Instance", "Disk"] },
                  "AvailableInstanceTypes": { "InstanceTypes": ["ecs.e-c1m2.large"] } },
                { "ZoneId": "ap-southeast-1c",
                  "AvailableResourceCreation": { "ResourceTypes": ["Instance"] },
                  "AvailableInstanceTypes": { "InstanceTypes": ["ecs.g7.large"] } }
            ] }
        }"#;
        let resp: DescribeZonesResponse = serde_json::from_str(json).unwrap();
        let hosts: Vec<bool> = resp
            .zones
            .zone
            .iter()
            .map(|z| z.can_host("ecs.e-c1m2.large"))
            .collect();

        assert_eq!(hosts, vec![false, true, false]);
    }

    #[test]
    fn test_instance_private_ip() {
        let json = r#"{
            "Instances": { "Instance": [ {
                "InstanceId": "i-1",
                "Status": "Running",
                "VpcAttributes": { "PrivateIpAddress": { "IpAddress": ["192.168.1.10"] } }
            } ] }
        }"#;
        let resp: DescribeInstancesResponse = serde_json::from_str(json).unwrap();
        let inst = &resp.instances.instance[0];

        assert_eq!(inst.private_ip().as_deref(), Some("192.168.1.10"));
    }

    #[test]
    fn test_json_list() {
        assert_eq!(json_list(&["i-1"]), r#"["i-1"]"#);
    }
}
