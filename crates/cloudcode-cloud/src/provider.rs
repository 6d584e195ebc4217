//! Cloud provider capability traits
//!
//! The provisioning engine talks to the cloud through a handful of narrow
//! capability traits rather than one large client. Each trait covers one
//! resource family; [`CloudApi`] bundles them and [`CloudProvider`] adds the
//! identity and authentication surface used by the CLI.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Private network and subnet operations
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_network(&self, name: &str, cidr: &str) -> Result<NetworkInfo>;

    async fn network_status(&self, network_id: &str) -> Result<NetworkStatus>;

    async fn delete_network(&self, network_id: &str) -> Result<()>;

    async fn create_subnet(
        &self,
        network_id: &str,
        zone: &str,
        cidr: &str,
        name: &str,
    ) -> Result<SubnetInfo>;

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;
}

/// Security group operations
#[async_trait]
pub trait FirewallApi: Send + Sync {
    /// Create a security group inside the given network and return its id
    async fn create_security_group(&self, network_id: &str, name: &str) -> Result<String>;

    /// Authorize all rules in a single batch
    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule]) -> Result<()>;

    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
}

/// SSH key pair operations
#[async_trait]
pub trait KeyPairApi: Send + Sync {
    /// Create a key pair. The private half is only ever returned here.
    ///
    /// Implementations replace a pre-existing pair of the same name.
    async fn create_key_pair(&self, name: &str) -> Result<KeyPairMaterial>;

    async fn delete_key_pair(&self, name: &str) -> Result<()>;
}

/// Compute instance operations
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Zones of the region and whether each can currently host `instance_type`
    async fn describe_zones(&self, instance_type: &str) -> Result<Vec<ZoneInfo>>;

    /// Create an instance (left stopped) and return its id
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String>;

    async fn start_instance(&self, instance_id: &str) -> Result<()>;

    async fn stop_instance(&self, instance_id: &str, mode: StopMode) -> Result<()>;

    /// Force-delete an instance regardless of its power state
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceInfo>;
}

/// Elastic (floating) public IP operations
#[async_trait]
pub trait FloatingIpApi: Send + Sync {
    async fn allocate_floating_ip(&self, name: &str) -> Result<FloatingIp>;

    async fn associate_floating_ip(&self, allocation_id: &str, instance_id: &str) -> Result<()>;

    async fn disassociate_floating_ip(&self, allocation_id: &str, instance_id: &str)
    -> Result<()>;

    async fn release_floating_ip(&self, allocation_id: &str) -> Result<()>;

    async fn floating_ip_status(&self, allocation_id: &str) -> Result<FloatingIpStatus>;
}

/// Disk, snapshot and image operations used by backup and restore
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn system_disk_id(&self, instance_id: &str) -> Result<String>;

    async fn create_snapshot(&self, disk_id: &str, name: &str) -> Result<String>;

    async fn snapshot_status(&self, snapshot_id: &str) -> Result<SnapshotStatus>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    async fn create_image_from_snapshot(&self, snapshot_id: &str, name: &str) -> Result<String>;

    async fn image_status(&self, image_id: &str) -> Result<ImageStatus>;

    async fn delete_image(&self, image_id: &str) -> Result<()>;
}

/// Every capability the deployment needs
pub trait CloudApi:
    NetworkApi + FirewallApi + KeyPairApi + ComputeApi + FloatingIpApi + StorageApi
{
}

impl<T> CloudApi for T where
    T: NetworkApi + FirewallApi + KeyPairApi + ComputeApi + FloatingIpApi + StorageApi
{
}

/// A concrete cloud backend
#[async_trait]
pub trait CloudProvider: CloudApi {
    /// Returns the provider name (e.g., "alibaba-cloud")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Region all resources are created in
    fn region(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Pending,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub id: String,
    pub zone: String,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    pub id: String,
    /// Whether the zone currently accepts new instances of the queried type
    pub available: bool,
}

impl ZoneInfo {
    pub fn new(id: impl Into<String>, available: bool) -> Self {
        Self {
            id: id.into(),
            available,
        }
    }
}

/// One inbound TCP rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
    pub source_cidr: String,
}

impl IngressRule {
    pub fn tcp(port: u16, source_cidr: impl Into<String>) -> Self {
        Self {
            port,
            source_cidr: source_cidr.into(),
        }
    }

    /// Port range in the `from/to` form cloud APIs expect
    pub fn port_range(&self) -> String {
        format!("{}/{}", self.port, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct KeyPairMaterial {
    pub name: String,
    pub private_key: String,
}

/// Everything needed to create the single compute instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub instance_type: String,
    pub image_id: String,
    pub security_group_id: String,
    pub subnet_id: String,
    pub key_pair_name: String,
    pub system_disk_size: u32,
    pub system_disk_category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    pub status: InstanceStatus,
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Other(String),
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "Pending"),
            InstanceStatus::Starting => write!(f, "Starting"),
            InstanceStatus::Running => write!(f, "Running"),
            InstanceStatus::Stopping => write!(f, "Stopping"),
            InstanceStatus::Stopped => write!(f, "Stopped"),
            InstanceStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// How an instance is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Release compute billing while stopped (suspend)
    StopCharging,
    /// Plain forced stop (before a snapshot)
    KeepCharging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloatingIpStatus {
    /// Allocated but not bound
    Available,
    /// Bound to an instance
    InUse,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    Progressing,
    Accomplished,
    Failed,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    Creating,
    Available,
    Failed,
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range() {
        let rule = IngressRule::tcp(8443, "0.0.0.0/0");
        assert_eq!(rule.port_range(), "8443/8443");
    }

    #[test]
    fn test_auth_status() {
        let ok = AuthStatus::ok("acct (123)");
        assert!(ok.authenticated);
        assert!(ok.error.is_none());

        let failed = AuthStatus::failed("no credentials");
        assert!(!failed.authenticated);
        assert_eq!(failed.error.as_deref(), Some("no credentials"));
    }
}
