//! Alibaba Cloud provider implementation

use crate::aliyun::{
    AllocateEipResponse, Aliyun, CallerIdentity, CreateImageResponse, CreateInstanceResponse,
    CreateKeyPairResponse, CreateSecurityGroupResponse, CreateSnapshotResponse,
    CreateVSwitchResponse, CreateVpcResponse, DescribeDisksResponse,
    DescribeEipAddressesResponse, DescribeImagesResponse, DescribeInstancesResponse,
    DescribeSnapshotsResponse, DescribeVpcsResponse, DescribeZonesResponse, Product, json_list,
};
use crate::error::AlibabaError;
use async_trait::async_trait;
use cloudcode_cloud::{
    AuthStatus, CloudError, CloudProvider, ComputeApi, FirewallApi, FloatingIp, FloatingIpApi,
    FloatingIpStatus, ImageStatus, IngressRule, InstanceInfo, InstanceSpec, InstanceStatus,
    KeyPairApi, KeyPairMaterial, NetworkApi, NetworkInfo, NetworkStatus, SnapshotStatus,
    StopMode, StorageApi, SubnetInfo, ZoneInfo,
};
use std::time::Duration;

type Result<T> = cloudcode_cloud::Result<T>;

const KEY_PAIR_EXISTS: &str = "KeyPair.AlreadyExist";
const KEY_PAIR_RECREATE_DELAY: Duration = Duration::from_secs(2);

fn api_error(action: &'static str) -> impl FnOnce(AlibabaError) -> CloudError {
    move |e| CloudError::api(action, e.to_string())
}

fn not_found(kind: &str, id: &str) -> CloudError {
    CloudError::ResourceNotFound(format!("{} {}", kind, id))
}

/// Like [`api_error`], but a `*.NotFound` rejection becomes `ResourceNotFound`
fn delete_error<'a>(
    action: &'static str,
    kind: &'a str,
    id: &'a str,
) -> impl FnOnce(AlibabaError) -> CloudError + 'a {
    move |e| {
        if e.is_not_found() {
            not_found(kind, id)
        } else {
            CloudError::api(action, e.to_string())
        }
    }
}

pub fn parse_instance_status(status: &str) -> InstanceStatus {
    match status {
        "Pending" => InstanceStatus::Pending,
        "Starting" => InstanceStatus::Starting,
        "Running" => InstanceStatus::Running,
        "Stopping" => InstanceStatus::Stopping,
        "Stopped" => InstanceStatus::Stopped,
        other => InstanceStatus::Other(other.to_string()),
    }
}

pub fn parse_floating_ip_status(status: &str) -> FloatingIpStatus {
    match status {
        "Available" => FloatingIpStatus::Available,
        "InUse" => FloatingIpStatus::InUse,
        other => FloatingIpStatus::Other(other.to_string()),
    }
}

pub fn parse_snapshot_status(status: &str) -> SnapshotStatus {
    match status {
        "progressing" => SnapshotStatus::Progressing,
        "accomplished" => SnapshotStatus::Accomplished,
        "failed" => SnapshotStatus::Failed,
        other => SnapshotStatus::Other(other.to_string()),
    }
}

pub fn parse_image_status(status: &str) -> ImageStatus {
    match status {
        "Creating" | "Waiting" => ImageStatus::Creating,
        "Available" => ImageStatus::Available,
        "CreateFailed" | "UnAvailable" => ImageStatus::Failed,
        other => ImageStatus::Other(other.to_string()),
    }
}

/// Alibaba Cloud provider
pub struct AlibabaCloudProvider {
    aliyun: Aliyun,
}

impl AlibabaCloudProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            aliyun: Aliyun::new(access_key_id, access_key_secret, region),
        }
    }

    fn region_param(&self) -> (&'static str, String) {
        ("RegionId", self.aliyun.region().to_string())
    }

    async fn create_key_pair_once(
        &self,
        name: &str,
    ) -> crate::error::Result<CreateKeyPairResponse> {
        self.aliyun
            .call(
                Product::Ecs,
                "CreateKeyPair",
                &[self.region_param(), ("KeyPairName", name.to_string())],
            )
            .await
    }
}

#[async_trait]
impl NetworkApi for AlibabaCloudProvider {
    async fn create_network(&self, name: &str, cidr: &str) -> Result<NetworkInfo> {
        let resp: CreateVpcResponse = self
            .aliyun
            .call(
                Product::Vpc,
                "CreateVpc",
                &[
                    self.region_param(),
                    ("VpcName", name.to_string()),
                    ("CidrBlock", cidr.to_string()),
                ],
            )
            .await
            .map_err(api_error("CreateVpc"))?;
        tracing::info!("Created VPC {}", resp.vpc_id);
        Ok(NetworkInfo {
            id: resp.vpc_id,
            cidr: cidr.to_string(),
        })
    }

    async fn network_status(&self, network_id: &str) -> Result<NetworkStatus> {
        let resp: DescribeVpcsResponse = self
            .aliyun
            .call(
                Product::Vpc,
                "DescribeVpcs",
                &[self.region_param(), ("VpcId", network_id.to_string())],
            )
            .await
            .map_err(api_error("DescribeVpcs"))?;
        let vpc = resp
            .vpcs
            .vpc
            .into_iter()
            .find(|v| v.vpc_id == network_id)
            .ok_or_else(|| not_found("VPC", network_id))?;
        Ok(if vpc.status == "Available" {
            NetworkStatus::Available
        } else {
            NetworkStatus::Pending
        })
    }

    async fn delete_network(&self, network_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Vpc,
                "DeleteVpc",
                &[self.region_param(), ("VpcId", network_id.to_string())],
            )
            .await
            .map_err(delete_error("DeleteVpc", "VPC", network_id))
    }

    async fn create_subnet(
        &self,
        network_id: &str,
        zone: &str,
        cidr: &str,
        name: &str,
    ) -> Result<SubnetInfo> {
        let resp: CreateVSwitchResponse = self
            .aliyun
            .call(
                Product::Vpc,
                "CreateVSwitch",
                &[
                    self.region_param(),
                    ("VpcId", network_id.to_string()),
                    ("ZoneId", zone.to_string()),
                    ("CidrBlock", cidr.to_string()),
                    ("VSwitchName", name.to_string()),
                ],
            )
            .await
            .map_err(api_error("CreateVSwitch"))?;
        Ok(SubnetInfo {
            id: resp.vswitch_id,
            zone: zone.to_string(),
            cidr: cidr.to_string(),
        })
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Vpc,
                "DeleteVSwitch",
                &[self.region_param(), ("VSwitchId", subnet_id.to_string())],
            )
            .await
            .map_err(delete_error("DeleteVSwitch", "VSwitch", subnet_id))
    }
}

#[async_trait]
impl FirewallApi for AlibabaCloudProvider {
    async fn create_security_group(&self, network_id: &str, name: &str) -> Result<String> {
        let resp: CreateSecurityGroupResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "CreateSecurityGroup",
                &[
                    self.region_param(),
                    ("VpcId", network_id.to_string()),
                    ("SecurityGroupName", name.to_string()),
                ],
            )
            .await
            .map_err(api_error("CreateSecurityGroup"))?;
        Ok(resp.security_group_id)
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()> {
        let keys: Vec<(String, String, String)> = (1..=rules.len())
            .map(|i| {
                (
                    format!("Permissions.{}.IpProtocol", i),
                    format!("Permissions.{}.PortRange", i),
                    format!("Permissions.{}.SourceCidrIp", i),
                )
            })
            .collect();
        let mut params = vec![
            self.region_param(),
            ("SecurityGroupId", group_id.to_string()),
        ];
        for (rule, (protocol, range, source)) in rules.iter().zip(keys.iter()) {
            params.push((protocol.as_str(), "TCP".to_string()));
            params.push((range.as_str(), rule.port_range()));
            params.push((source.as_str(), rule.source_cidr.clone()));
        }

        self.aliyun
            .call_unit(Product::Ecs, "AuthorizeSecurityGroup", &params)
            .await
            .map_err(api_error("AuthorizeSecurityGroup"))
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "DeleteSecurityGroup",
                &[self.region_param(), ("SecurityGroupId", group_id.to_string())],
            )
            .await
            .map_err(delete_error("DeleteSecurityGroup", "security group", group_id))
    }
}

#[async_trait]
impl KeyPairApi for AlibabaCloudProvider {
    async fn create_key_pair(&self, name: &str) -> Result<KeyPairMaterial> {
        let resp = match self.create_key_pair_once(name).await {
            Ok(resp) => resp,
            Err(e) if e.is_error_code(KEY_PAIR_EXISTS) => {
                // The private key is only returned at creation, so a leftover
                // pair is replaced
                tracing::warn!("Key pair {} already exists, recreating it", name);
                self.delete_key_pair(name).await?;
                tokio::time::sleep(KEY_PAIR_RECREATE_DELAY).await;
                self.create_key_pair_once(name)
                    .await
                    .map_err(api_error("CreateKeyPair"))?
            }
            Err(e) => return Err(api_error("CreateKeyPair")(e)),
        };
        Ok(KeyPairMaterial {
            name: resp.key_pair_name,
            private_key: resp.private_key_body,
        })
    }

    async fn delete_key_pair(&self, name: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "DeleteKeyPairs",
                &[self.region_param(), ("KeyPairNames", json_list(&[name]))],
            )
            .await
            .map_err(api_error("DeleteKeyPairs"))
    }
}

#[async_trait]
impl ComputeApi for AlibabaCloudProvider {
    async fn describe_zones(&self, instance_type: &str) -> Result<Vec<ZoneInfo>> {
        let resp: DescribeZonesResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "DescribeZones",
                &[
                    self.region_param(),
                    ("InstanceChargeType", "PostPaid".to_string()),
                ],
            )
            .await
            .map_err(api_error("DescribeZones"))?;
        Ok(resp
            .zones
            .zone
            .iter()
            .map(|z| ZoneInfo::new(z.zone_id.clone(), z.can_host(instance_type)))
            .collect())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String> {
        let resp: CreateInstanceResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "CreateInstance",
                &[
                    self.region_param(),
                    ("ZoneId", spec.zone.clone()),
                    ("InstanceType", spec.instance_type.clone()),
                    ("ImageId", spec.image_id.clone()),
                    ("SecurityGroupId", spec.security_group_id.clone()),
                    ("VSwitchId", spec.subnet_id.clone()),
                    ("KeyPairName", spec.key_pair_name.clone()),
                    ("InstanceName", spec.name.clone()),
                    ("InstanceChargeType", "PostPaid".to_string()),
                    ("InternetMaxBandwidthOut", "0".to_string()),
                    ("SystemDisk.Size", spec.system_disk_size.to_string()),
                    ("SystemDisk.Category", spec.system_disk_category.clone()),
                ],
            )
            .await
            .map_err(api_error("CreateInstance"))?;
        tracing::info!("Created ECS instance {}", resp.instance_id);
        Ok(resp.instance_id)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "StartInstance",
                &[("InstanceId", instance_id.to_string())],
            )
            .await
            .map_err(api_error("StartInstance"))
    }

    async fn stop_instance(&self, instance_id: &str, mode: StopMode) -> Result<()> {
        let stopped_mode = match mode {
            StopMode::StopCharging => "StopCharging",
            StopMode::KeepCharging => "KeepCharging",
        };
        self.aliyun
            .call_unit(
                Product::Ecs,
                "StopInstance",
                &[
                    ("InstanceId", instance_id.to_string()),
                    ("ForceStop", "true".to_string()),
                    ("StoppedMode", stopped_mode.to_string()),
                ],
            )
            .await
            .map_err(api_error("StopInstance"))
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "DeleteInstance",
                &[
                    ("InstanceId", instance_id.to_string()),
                    ("Force", "true".to_string()),
                ],
            )
            .await
            .map_err(delete_error("DeleteInstance", "ECS instance", instance_id))
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo> {
        let resp: DescribeInstancesResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "DescribeInstances",
                &[self.region_param(), ("InstanceIds", json_list(&[instance_id]))],
            )
            .await
            .map_err(api_error("DescribeInstances"))?;
        let inst = resp
            .instances
            .instance
            .into_iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| not_found("ECS instance", instance_id))?;
        Ok(InstanceInfo {
            id: inst.instance_id.clone(),
            status: parse_instance_status(&inst.status),
            private_ip: inst.private_ip(),
        })
    }
}

#[async_trait]
impl FloatingIpApi for AlibabaCloudProvider {
    async fn allocate_floating_ip(&self, name: &str) -> Result<FloatingIp> {
        let resp: AllocateEipResponse = self
            .aliyun
            .call(
                Product::Vpc,
                "AllocateEipAddress",
                &[
                    self.region_param(),
                    ("Name", name.to_string()),
                    ("InternetChargeType", "PayByTraffic".to_string()),
                ],
            )
            .await
            .map_err(api_error("AllocateEipAddress"))?;
        Ok(FloatingIp {
            id: resp.allocation_id,
            ip: resp.eip_address,
        })
    }

    async fn associate_floating_ip(&self, allocation_id: &str, instance_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Vpc,
                "AssociateEipAddress",
                &[
                    self.region_param(),
                    ("AllocationId", allocation_id.to_string()),
                    ("InstanceId", instance_id.to_string()),
                ],
            )
            .await
            .map_err(api_error("AssociateEipAddress"))
    }

    async fn disassociate_floating_ip(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Vpc,
                "UnassociateEipAddress",
                &[
                    self.region_param(),
                    ("AllocationId", allocation_id.to_string()),
                    ("InstanceId", instance_id.to_string()),
                ],
            )
            .await
            .map_err(api_error("UnassociateEipAddress"))
    }

    async fn release_floating_ip(&self, allocation_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Vpc,
                "ReleaseEipAddress",
                &[
                    self.region_param(),
                    ("AllocationId", allocation_id.to_string()),
                ],
            )
            .await
            .map_err(delete_error("ReleaseEipAddress", "EIP", allocation_id))
    }

    async fn floating_ip_status(&self, allocation_id: &str) -> Result<FloatingIpStatus> {
        let resp: DescribeEipAddressesResponse = self
            .aliyun
            .call(
                Product::Vpc,
                "DescribeEipAddresses",
                &[
                    self.region_param(),
                    ("AllocationId", allocation_id.to_string()),
                ],
            )
            .await
            .map_err(api_error("DescribeEipAddresses"))?;
        let eip = resp
            .eip_addresses
            .eip_address
            .into_iter()
            .find(|e| e.allocation_id == allocation_id)
            .ok_or_else(|| not_found("EIP", allocation_id))?;
        Ok(parse_floating_ip_status(&eip.status))
    }
}

#[async_trait]
impl StorageApi for AlibabaCloudProvider {
    async fn system_disk_id(&self, instance_id: &str) -> Result<String> {
        let resp: DescribeDisksResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "DescribeDisks",
                &[
                    self.region_param(),
                    ("InstanceId", instance_id.to_string()),
                    ("DiskType", "system".to_string()),
                ],
            )
            .await
            .map_err(api_error("DescribeDisks"))?;
        resp.disks
            .disk
            .into_iter()
            .next()
            .map(|d| d.disk_id)
            .ok_or_else(|| not_found("system disk of", instance_id))
    }

    async fn create_snapshot(&self, disk_id: &str, name: &str) -> Result<String> {
        let resp: CreateSnapshotResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "CreateSnapshot",
                &[
                    ("DiskId", disk_id.to_string()),
                    ("SnapshotName", name.to_string()),
                ],
            )
            .await
            .map_err(api_error("CreateSnapshot"))?;
        Ok(resp.snapshot_id)
    }

    async fn snapshot_status(&self, snapshot_id: &str) -> Result<SnapshotStatus> {
        let resp: DescribeSnapshotsResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "DescribeSnapshots",
                &[self.region_param(), ("SnapshotIds", json_list(&[snapshot_id]))],
            )
            .await
            .map_err(api_error("DescribeSnapshots"))?;
        let snap = resp
            .snapshots
            .snapshot
            .into_iter()
            .next()
            .ok_or_else(|| not_found("snapshot", snapshot_id))?;
        Ok(parse_snapshot_status(&snap.status))
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "DeleteSnapshot",
                &[("SnapshotId", snapshot_id.to_string())],
            )
            .await
            .map_err(api_error("DeleteSnapshot"))
    }

    async fn create_image_from_snapshot(&self, snapshot_id: &str, name: &str) -> Result<String> {
        let resp: CreateImageResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "CreateImage",
                &[
                    self.region_param(),
                    ("SnapshotId", snapshot_id.to_string()),
                    ("ImageName", name.to_string()),
                ],
            )
            .await
            .map_err(api_error("CreateImage"))?;
        Ok(resp.image_id)
    }

    async fn image_status(&self, image_id: &str) -> Result<ImageStatus> {
        let resp: DescribeImagesResponse = self
            .aliyun
            .call(
                Product::Ecs,
                "DescribeImages",
                &[
                    self.region_param(),
                    ("ImageId", image_id.to_string()),
                    ("Status", "Creating,Waiting,Available,UnAvailable,CreateFailed".to_string()),
                ],
            )
            .await
            .map_err(api_error("DescribeImages"))?;
        let image = resp
            .images
            .image
            .into_iter()
            .next()
            .ok_or_else(|| not_found("image", image_id))?;
        Ok(parse_image_status(&image.status))
    }

    async fn delete_image(&self, image_id: &str) -> Result<()> {
        self.aliyun
            .call_unit(
                Product::Ecs,
                "DeleteImage",
                &[self.region_param(), ("ImageId", image_id.to_string())],
            )
            .await
            .map_err(api_error("DeleteImage"))
    }
}

#[async_trait]
impl CloudProvider for AlibabaCloudProvider {
    fn name(&self) -> &str {
        "alibaba-cloud"
    }

    fn display_name(&self) -> &str {
        "Alibaba Cloud"
    }

    fn region(&self) -> &str {
        self.aliyun.region()
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        if let Err(e) = self.aliyun.ensure_installed().await {
            return Ok(AuthStatus::failed(e.to_string()));
        }
        let identity: std::result::Result<CallerIdentity, _> = self
            .aliyun
            .call(Product::Sts, "GetCallerIdentity", &[])
            .await;
        match identity {
            Ok(id) if id.arn.is_empty() => Ok(AuthStatus::ok(id.account_id)),
            Ok(id) => Ok(AuthStatus::ok(format!("{} ({})", id.account_id, id.arn))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }
}
