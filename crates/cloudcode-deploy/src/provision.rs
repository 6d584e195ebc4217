//! Idempotent resource provisioning
//!
//! [`Provisioner::ensure_provisioned`] walks the six resource slots in
//! dependency order. Populated slots are left alone; empty slots are created
//! and the record is persisted immediately after each one, so an interrupted
//! run can simply be re-invoked.

use crate::error::{DeployError, Result};
use crate::timing::Timings;
use cloudcode_cloud::state::{
    EcsResource, EipResource, SecurityGroupResource, SshKeyPairResource, VSwitchResource,
    VpcResource,
};
use cloudcode_cloud::{
    Backup, CloudApi, CloudError, DeploymentState, ImageStatus, IngressRule, InstanceInfo,
    InstanceSpec, InstanceStatus, LifecyclePhase, NetworkStatus, ProvisionReport, ResourceSlot,
    StateStore, ZoneInfo, poll_until,
};

pub const NETWORK_NAME: &str = "cloudcode-vpc";
pub const NETWORK_CIDR: &str = "192.168.0.0/16";
pub const SUBNET_NAME: &str = "cloudcode-vswitch";
pub const SUBNET_CIDR: &str = "192.168.1.0/24";
pub const SECURITY_GROUP_NAME: &str = "cloudcode-sg";
pub const KEY_PAIR_NAME: &str = "cloudcode-ssh-key";
pub const INSTANCE_NAME: &str = "cloudcode-ecs";
pub const FLOATING_IP_NAME: &str = "cloudcode-eip";
pub const RESTORE_IMAGE_NAME: &str = "cloudcode-restore";

pub const DEFAULT_INSTANCE_TYPE: &str = "ecs.e-c1m2.large";
pub const DEFAULT_IMAGE_ID: &str = "ubuntu_24_04_x64_20G_alibase_20260119.vhd";
pub const DEFAULT_SYSTEM_DISK_SIZE: u32 = 60;
pub const DEFAULT_SYSTEM_DISK_CATEGORY: &str = "cloud_essd";

pub const DEFAULT_REGION: &str = "ap-southeast-1";
pub const DEFAULT_ZONE_PRIORITY: &[&str] = &["ap-southeast-1a", "ap-southeast-1b", "ap-southeast-1c"];

const ANYWHERE: &str = "0.0.0.0/0";

/// Zone preference for a region. Outside the default region the provider's
/// own ordering is used.
pub fn zone_priority(region: &str) -> Vec<String> {
    if region == DEFAULT_REGION {
        DEFAULT_ZONE_PRIORITY.iter().map(|z| z.to_string()).collect()
    } else {
        Vec::new()
    }
}

/// Pick the first zone in `priority` that can host an instance.
///
/// An empty priority list accepts the first available zone.
pub fn select_zone(zones: &[ZoneInfo], priority: &[String]) -> std::result::Result<String, CloudError> {
    if priority.is_empty() {
        return zones
            .iter()
            .find(|z| z.available)
            .map(|z| z.id.clone())
            .ok_or(CloudError::NoAvailableZone);
    }

    priority
        .iter()
        .find(|wanted| zones.iter().any(|z| z.available && &z.id == *wanted))
        .cloned()
        .ok_or(CloudError::NoAvailableZone)
}

/// SSH from `ssh_source` (anywhere if unset), HTTP, HTTPS and the auth
/// portal from anywhere
pub fn default_ingress_rules(ssh_source: Option<&str>) -> Vec<IngressRule> {
    vec![
        IngressRule::tcp(22, ssh_source.unwrap_or(ANYWHERE)),
        IngressRule::tcp(80, ANYWHERE),
        IngressRule::tcp(443, ANYWHERE),
        IngressRule::tcp(8443, ANYWHERE),
    ]
}

/// Load the current record, or start a fresh one.
///
/// A record whose phase is `destroyed` is replaced by a fresh one, and the
/// backup left behind by that destroy is returned so the instance can be
/// restored from its snapshot.
pub async fn prepare_state(
    store: &StateStore,
    region: &str,
) -> Result<(DeploymentState, Option<Backup>)> {
    match store.load_optional().await? {
        Some(state) if state.status != Some(LifecyclePhase::Destroyed) => Ok((state, None)),
        previous => {
            if previous.is_some() {
                tracing::info!("Previous deployment was destroyed, starting a new record");
            }
            let backup = store.load_backup().await?;
            let backup = backup.filter(|b| b.region == region);
            Ok((DeploymentState::new(region, DEFAULT_IMAGE_ID), backup))
        }
    }
}

/// Inputs to a provisioning pass
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// CIDR allowed to reach SSH; anywhere when unset
    pub ssh_source: Option<String>,

    /// Zone preference; see [`zone_priority`]
    pub zone_priority: Vec<String>,

    /// Create the instance from this backup's snapshot
    pub restore: Option<Backup>,
}

pub struct Provisioner<'a> {
    cloud: &'a dyn CloudApi,
    store: &'a StateStore,
    timings: &'a Timings,
}

impl<'a> Provisioner<'a> {
    pub fn new(cloud: &'a dyn CloudApi, store: &'a StateStore, timings: &'a Timings) -> Self {
        Self {
            cloud,
            store,
            timings,
        }
    }

    /// Bring every slot into existence exactly once
    pub async fn ensure_provisioned(
        &self,
        state: &mut DeploymentState,
        options: &ProvisionOptions,
    ) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::new();

        self.ensure_network(state, &mut report).await?;
        self.ensure_subnet(state, options, &mut report).await?;
        self.ensure_security_group(state, options, &mut report).await?;
        self.ensure_key_pair(state, &mut report).await?;
        self.ensure_instance(state, options, &mut report).await?;
        self.ensure_floating_ip(state, &mut report).await?;

        Ok(report)
    }

    async fn ensure_network(
        &self,
        state: &mut DeploymentState,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(id) = state.resource_id(ResourceSlot::Vpc) {
            report.add_existing(ResourceSlot::Vpc, id);
            return Ok(());
        }

        let network = self.cloud.create_network(NETWORK_NAME, NETWORK_CIDR).await?;
        state.resources.vpc = VpcResource {
            id: network.id.clone(),
            cidr: network.cidr,
        };
        self.store.save(state).await?;
        tracing::info!("Created VPC {}", network.id);
        report.add_created(ResourceSlot::Vpc, network.id);
        Ok(())
    }

    async fn ensure_subnet(
        &self,
        state: &mut DeploymentState,
        options: &ProvisionOptions,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(id) = state.resource_id(ResourceSlot::VSwitch) {
            report.add_existing(ResourceSlot::VSwitch, id);
            return Ok(());
        }

        let network_id = state.resources.vpc.id.clone();

        // Subnets cannot be created while the VPC is still pending
        let cloud = self.cloud;
        poll_until("VPC to become available", &self.timings.network_poll, || {
            let network_id = network_id.clone();
            async move {
                let status = cloud.network_status(&network_id).await?;
                Ok((status == NetworkStatus::Available).then_some(()))
            }
        })
        .await?;

        let zones = self.cloud.describe_zones(DEFAULT_INSTANCE_TYPE).await?;
        let zone = select_zone(&zones, &options.zone_priority)?;
        tracing::debug!("Selected zone {}", zone);

        let subnet = self
            .cloud
            .create_subnet(&network_id, &zone, SUBNET_CIDR, SUBNET_NAME)
            .await?;
        state.resources.vswitch = VSwitchResource {
            id: subnet.id.clone(),
            zone: subnet.zone,
            cidr: subnet.cidr,
        };
        self.store.save(state).await?;
        tracing::info!("Created VSwitch {} in {}", subnet.id, state.resources.vswitch.zone);
        report.add_created(ResourceSlot::VSwitch, subnet.id);
        Ok(())
    }

    async fn ensure_security_group(
        &self,
        state: &mut DeploymentState,
        options: &ProvisionOptions,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(id) = state.resource_id(ResourceSlot::SecurityGroup) {
            report.add_existing(ResourceSlot::SecurityGroup, id);
            return Ok(());
        }

        let group_id = self
            .cloud
            .create_security_group(&state.resources.vpc.id, SECURITY_GROUP_NAME)
            .await?;

        let rules = default_ingress_rules(options.ssh_source.as_deref());
        if let Err(e) = self.cloud.authorize_ingress(&group_id, &rules).await {
            // The group is not recorded yet, so remove it rather than leak it
            if let Err(cleanup) = self.cloud.delete_security_group(&group_id).await {
                tracing::warn!("Failed to remove security group {}: {}", group_id, cleanup);
            }
            return Err(e.into());
        }

        state.resources.security_group = SecurityGroupResource {
            id: group_id.clone(),
        };
        self.store.save(state).await?;
        tracing::info!("Created security group {}", group_id);
        report.add_created(ResourceSlot::SecurityGroup, group_id);
        Ok(())
    }

    async fn ensure_key_pair(
        &self,
        state: &mut DeploymentState,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(name) = state.resource_id(ResourceSlot::SshKeyPair) {
            report.add_existing(ResourceSlot::SshKeyPair, name);
            return Ok(());
        }

        let material = self.cloud.create_key_pair(KEY_PAIR_NAME).await?;

        // The private key must be on disk before the slot is recorded
        let key_path = self
            .store
            .write_private_key(&material.private_key)
            .await
            .map_err(DeployError::KeyFile)?;

        state.resources.ssh_key_pair = SshKeyPairResource {
            name: material.name.clone(),
            private_key_path: key_path.display().to_string(),
        };
        self.store.save(state).await?;
        tracing::info!("Created SSH key pair {}", material.name);
        report.add_created(ResourceSlot::SshKeyPair, material.name);
        Ok(())
    }

    async fn ensure_instance(
        &self,
        state: &mut DeploymentState,
        options: &ProvisionOptions,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(id) = state.resource_id(ResourceSlot::Ecs).map(str::to_string) {
            // Created by a run that stopped before the instance came up
            if state.resources.ecs.private_ip.is_empty() {
                tracing::info!("Finishing start of ECS instance {}", id);
                let info = self.bring_up(&id).await?;
                state.resources.ecs.private_ip = info.private_ip.unwrap_or_default();
                self.store.save(state).await?;
            }
            report.add_existing(ResourceSlot::Ecs, id);
            return Ok(());
        }

        let (image_id, temp_image, disk_size) = match &options.restore {
            Some(backup) => {
                let image_id = self.image_from_backup(backup).await?;
                let disk_size = backup.disk_size.max(DEFAULT_SYSTEM_DISK_SIZE);
                (image_id.clone(), Some(image_id), disk_size)
            }
            None => (state.os_image.clone(), None, DEFAULT_SYSTEM_DISK_SIZE),
        };

        let spec = InstanceSpec {
            name: INSTANCE_NAME.to_string(),
            zone: state.resources.vswitch.zone.clone(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            image_id,
            security_group_id: state.resources.security_group.id.clone(),
            subnet_id: state.resources.vswitch.id.clone(),
            key_pair_name: state.resources.ssh_key_pair.name.clone(),
            system_disk_size: disk_size,
            system_disk_category: DEFAULT_SYSTEM_DISK_CATEGORY.to_string(),
        };

        let instance_id = match self.cloud.create_instance(&spec).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(image) = &temp_image {
                    self.remove_temp_image(image).await;
                }
                return Err(e.into());
            }
        };

        state.resources.ecs = EcsResource {
            id: instance_id.clone(),
            instance_type: spec.instance_type.clone(),
            system_disk_size: spec.system_disk_size,
            ..EcsResource::default()
        };
        self.store.save(state).await?;
        tracing::info!("Created ECS instance {}", instance_id);

        let started = self.bring_up(&instance_id).await;

        // The instance holds its own copy of the disk once created
        if let Some(image) = &temp_image {
            self.remove_temp_image(image).await;
        }

        state.resources.ecs.private_ip = started?.private_ip.unwrap_or_default();
        self.store.save(state).await?;

        report.add_created(ResourceSlot::Ecs, instance_id);
        Ok(())
    }

    /// Start a stopped instance and wait until it is running
    async fn bring_up(&self, instance_id: &str) -> Result<InstanceInfo> {
        let current = self.cloud.describe_instance(instance_id).await?;
        if current.status == InstanceStatus::Stopped {
            self.cloud.start_instance(instance_id).await?;
        }

        let cloud = self.cloud;
        let info = poll_until("ECS instance to be running", &self.timings.instance_poll, || async move {
            let info = cloud.describe_instance(instance_id).await?;
            Ok((info.status == InstanceStatus::Running).then_some(info))
        })
        .await?;
        Ok(info)
    }

    async fn image_from_backup(&self, backup: &Backup) -> Result<String> {
        tracing::info!("Restoring from snapshot {}", backup.snapshot_id);
        let image_id = self
            .cloud
            .create_image_from_snapshot(&backup.snapshot_id, RESTORE_IMAGE_NAME)
            .await?;

        let cloud = self.cloud;
        let ready = poll_until("restore image to become available", &self.timings.storage_poll, || {
            let image_id = image_id.clone();
            async move {
                match cloud.image_status(&image_id).await? {
                    ImageStatus::Available => Ok(Some(Ok(()))),
                    ImageStatus::Failed => Ok(Some(Err(()))),
                    _ => Ok(None),
                }
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => Ok(image_id),
            Ok(Err(())) => {
                self.remove_temp_image(&image_id).await;
                Err(CloudError::api("CreateImage", format!("image {} failed to build", image_id)).into())
            }
            Err(e) => {
                self.remove_temp_image(&image_id).await;
                Err(e.into())
            }
        }
    }

    async fn remove_temp_image(&self, image_id: &str) {
        match self.cloud.delete_image(image_id).await {
            Ok(()) => tracing::debug!("Removed temporary image {}", image_id),
            Err(e) => tracing::warn!("Failed to remove temporary image {}: {}", image_id, e),
        }
    }

    async fn ensure_floating_ip(
        &self,
        state: &mut DeploymentState,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        if let Some(id) = state.resource_id(ResourceSlot::Eip) {
            report.add_existing(ResourceSlot::Eip, id);
            return Ok(());
        }

        let eip = self.cloud.allocate_floating_ip(FLOATING_IP_NAME).await?;
        if let Err(e) = self
            .cloud
            .associate_floating_ip(&eip.id, &state.resources.ecs.id)
            .await
        {
            if let Err(cleanup) = self.cloud.release_floating_ip(&eip.id).await {
                tracing::warn!("Failed to release EIP {}: {}", eip.id, cleanup);
            }
            return Err(e.into());
        }

        state.resources.eip = EipResource {
            id: eip.id.clone(),
            ip: eip.ip.clone(),
        };
        state.resources.ecs.public_ip = eip.ip.clone();
        self.store.save(state).await?;
        tracing::info!("Allocated EIP {} ({})", eip.id, eip.ip);
        report.add_created(ResourceSlot::Eip, eip.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones(spec: &[(&str, bool)]) -> Vec<ZoneInfo> {
        spec.iter().map(|(id, ok)| ZoneInfo::new(*id, *ok)).collect()
    }

    fn priority() -> Vec<String> {
        zone_priority(DEFAULT_REGION)
    }

    #[test]
    fn test_select_zone_fallback() {
        let zones = zones(&[
            ("ap-southeast-1a", false),
            ("ap-southeast-1b", true),
            ("ap-southeast-1c", true),
        ]);
        assert_eq!(select_zone(&zones, &priority()).unwrap(), "ap-southeast-1b");
    }

    #[test]
    fn test_select_zone_follows_priority_not_listing_order() {
        let zones = zones(&[
            ("ap-southeast-1c", true),
            ("ap-southeast-1a", true),
        ]);
        assert_eq!(select_zone(&zones, &priority()).unwrap(), "ap-southeast-1a");
    }

    #[test]
    fn test_select_zone_none_available() {
        let zones = zones(&[
            ("ap-southeast-1a", false),
            ("ap-southeast-1d", true),
        ]);
        assert!(matches!(
            select_zone(&zones, &priority()),
            Err(CloudError::NoAvailableZone)
        ));
    }

    #[test]
    fn test_select_zone_without_priority() {
        let zones = zones(&[("cn-hangzhou-h", false), ("cn-hangzhou-i", true)]);
        assert_eq!(select_zone(&zones, &[]).unwrap(), "cn-hangzhou-i");
    }

    #[test]
    fn test_default_ingress_rules() {
        let rules = default_ingress_rules(Some("203.0.113.7/32"));
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], IngressRule::tcp(22, "203.0.113.7/32"));
        assert!(rules[1..].iter().all(|r| r.source_cidr == "0.0.0.0/0"));

        let open = default_ingress_rules(None);
        assert_eq!(open[0].source_cidr, "0.0.0.0/0");
    }
}
