//! Teardown with optional snapshot backup
//!
//! Resources are deleted in reverse-dependency order. Each successful
//! deletion clears its slot and persists the record straight away, and a
//! failed deletion does not stop the others, so a second run only retries
//! what is left.

use crate::error::{DeployError, Result};
use crate::lifecycle::wait_for_status;
use crate::prompt::Prompter;
use crate::provision::DEFAULT_SYSTEM_DISK_SIZE;
use crate::timing::Timings;
use chrono::Utc;
use cloudcode_cloud::{
    Backup, CloudApi, CloudError, DeploymentState, InstanceStatus, LifecyclePhase, ResourceSlot,
    SnapshotStatus, StateStore, StopMode, TeardownReport, poll_until,
};

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Skip every confirmation
    pub force: bool,
    /// Only report what would be deleted
    pub dry_run: bool,
    /// Snapshot the disk first. `None` asks, or backs up under `force`.
    pub keep_backup: Option<bool>,
    /// Recorded in the backup
    pub version: String,
}

/// Populated slots in teardown order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyPlan {
    pub resources: Vec<(ResourceSlot, String)>,
}

impl DestroyPlan {
    pub fn from_state(state: &DeploymentState) -> Self {
        let resources = ResourceSlot::TEARDOWN
            .into_iter()
            .filter_map(|slot| state.resource_id(slot).map(|id| (slot, id.to_string())))
            .collect();
        Self { resources }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[derive(Debug)]
pub enum DestroyOutcome {
    NothingToDo,
    DryRun(DestroyPlan),
    Cancelled,
    Completed {
        report: TeardownReport,
        backup: Option<Backup>,
    },
}

/// Snapshot name for a backup taken now, e.g. `cloudcode-20260301-142233`
pub fn snapshot_name() -> String {
    format!("cloudcode-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

pub struct Destroyer<'a> {
    cloud: &'a dyn CloudApi,
    store: &'a StateStore,
    prompter: &'a dyn Prompter,
    timings: &'a Timings,
}

impl<'a> Destroyer<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        store: &'a StateStore,
        prompter: &'a dyn Prompter,
        timings: &'a Timings,
    ) -> Self {
        Self {
            cloud,
            store,
            prompter,
            timings,
        }
    }

    /// What a destroy would delete, or `None` without a record
    pub async fn plan(&self) -> Result<Option<DestroyPlan>> {
        let state = self.store.load_optional().await?;
        Ok(state.as_ref().map(DestroyPlan::from_state))
    }

    pub async fn run(&self, options: &DestroyOptions) -> Result<DestroyOutcome> {
        let Some(mut state) = self.store.load_optional().await? else {
            return Ok(DestroyOutcome::NothingToDo);
        };

        let plan = DestroyPlan::from_state(&state);
        if plan.is_empty() {
            return Ok(DestroyOutcome::NothingToDo);
        }
        if options.dry_run {
            return Ok(DestroyOutcome::DryRun(plan));
        }

        let mut backup = None;
        if state.is_populated(ResourceSlot::Ecs) && self.wants_backup(options)? {
            match self.create_backup(&state, &options.version).await {
                Ok(b) => backup = Some(b),
                Err(e) => {
                    tracing::warn!("Backup failed: {}", e);
                    if options.force {
                        if options.keep_backup == Some(true) {
                            return Err(e);
                        }
                    } else if !self.prompter.confirm(
                        &format!("Backup failed ({}). Destroy anyway and lose the data?", e),
                        false,
                    )? {
                        return Ok(DestroyOutcome::Cancelled);
                    }
                }
            }
        }

        if !options.force
            && !self
                .prompter
                .confirm("Permanently delete all resources listed above?", false)?
        {
            return Ok(DestroyOutcome::Cancelled);
        }

        let report = self.teardown(&mut state).await;

        if let Err(e) = self.store.remove_private_key().await {
            tracing::warn!("Failed to remove local SSH key: {}", e);
        }

        if !report.is_success() {
            return Err(DeployError::TeardownIncomplete {
                failed: report.failure_lines(),
            });
        }

        let backup = match backup {
            Some(b) => Some(b),
            None => self.backup_from_earlier_run(&state).await?,
        };

        if backup.is_some() {
            state.status = Some(LifecyclePhase::Destroyed);
            self.store.save(&state).await?;
        } else {
            self.store.delete().await?;
            self.store.delete_backup().await?;
        }

        Ok(DestroyOutcome::Completed { report, backup })
    }

    fn wants_backup(&self, options: &DestroyOptions) -> Result<bool> {
        match options.keep_backup {
            Some(keep) => Ok(keep),
            None if options.force => Ok(true),
            None => Ok(self
                .prompter
                .confirm("Snapshot the disk before destroying?", true)?),
        }
    }

    /// A backup taken of this deployment by a destroy that did not finish.
    ///
    /// The instance is gone by now, so the snapshot is the only copy of its
    /// disk.
    async fn backup_from_earlier_run(&self, state: &DeploymentState) -> Result<Option<Backup>> {
        let backup = self.store.load_backup().await?;
        Ok(backup.filter(|b| b.region == state.region && b.created_at >= state.created_at))
    }

    /// Stop the instance, snapshot its system disk and record the backup.
    ///
    /// A previous snapshot is deleted once the new one is ready.
    async fn create_backup(&self, state: &DeploymentState, version: &str) -> Result<Backup> {
        let instance_id = state.resources.ecs.id.as_str();

        // A suspended instance is already stopped and rejects another stop
        let current = self.cloud.describe_instance(instance_id).await?;
        if current.status != InstanceStatus::Stopped {
            if current.status != InstanceStatus::Stopping {
                tracing::info!("Stopping instance {} for backup", instance_id);
                self.cloud
                    .stop_instance(instance_id, StopMode::KeepCharging)
                    .await?;
            }
            wait_for_status(
                self.cloud,
                instance_id,
                InstanceStatus::Stopped,
                &self.timings.instance_poll,
            )
            .await?;
        }

        let disk_id = self.cloud.system_disk_id(instance_id).await?;
        let snapshot_id = self.cloud.create_snapshot(&disk_id, &snapshot_name()).await?;
        tracing::info!("Creating snapshot {} of disk {}", snapshot_id, disk_id);

        let cloud = self.cloud;
        let completed = poll_until("snapshot to complete", &self.timings.storage_poll, || {
            let snapshot_id = snapshot_id.clone();
            async move {
                match cloud.snapshot_status(&snapshot_id).await? {
                    SnapshotStatus::Accomplished => Ok(Some(true)),
                    SnapshotStatus::Failed => Ok(Some(false)),
                    _ => Ok(None),
                }
            }
        })
        .await?;
        if !completed {
            return Err(CloudError::api(
                "CreateSnapshot",
                format!("snapshot {} failed", snapshot_id),
            )
            .into());
        }

        let previous = self.store.load_backup().await?;
        if let Some(previous) = previous.filter(|p| p.snapshot_id != snapshot_id) {
            match self.cloud.delete_snapshot(&previous.snapshot_id).await {
                Ok(()) => tracing::info!("Deleted previous snapshot {}", previous.snapshot_id),
                Err(e) => tracing::warn!(
                    "Failed to delete previous snapshot {}: {}",
                    previous.snapshot_id,
                    e
                ),
            }
        }

        let disk_size = match state.resources.ecs.system_disk_size {
            0 => DEFAULT_SYSTEM_DISK_SIZE,
            size => size,
        };
        let backup = Backup {
            cloudcode_version: version.to_string(),
            snapshot_id,
            created_at: Utc::now(),
            region: state.region.clone(),
            disk_size,
            domain: state.cloudcode.domain.clone(),
            username: state.cloudcode.username.clone(),
        };
        self.store.save_backup(&backup).await?;
        Ok(backup)
    }

    /// Attempt every populated slot, recording failures instead of stopping
    async fn teardown(&self, state: &mut DeploymentState) -> TeardownReport {
        let mut report = TeardownReport::new();

        for slot in ResourceSlot::TEARDOWN {
            let Some(id) = state.resource_id(slot).map(str::to_string) else {
                continue;
            };

            let deleted = match self.delete_slot(state, slot, &id).await {
                // Deleted by an earlier run whose record update was lost
                Err(CloudError::ResourceNotFound(_)) => {
                    tracing::info!("{} {} no longer exists", slot, id);
                    Ok(())
                }
                other => other,
            };

            match deleted {
                Ok(()) => {
                    tracing::info!("Deleted {} {}", slot, id);
                    state.clear(slot);
                    match self.store.save(state).await {
                        Ok(()) => report.add_success(slot, id),
                        Err(e) => {
                            tracing::warn!("Failed to record deletion of {} {}: {}", slot, id, e);
                            report.add_failure(
                                slot,
                                id,
                                format!("deleted, but the record could not be updated: {}", e),
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {} {}: {}", slot, id, e);
                    report.add_failure(slot, id, e.to_string());
                }
            }
        }

        report
    }

    async fn delete_slot(
        &self,
        state: &DeploymentState,
        slot: ResourceSlot,
        id: &str,
    ) -> std::result::Result<(), CloudError> {
        match slot {
            ResourceSlot::Eip => {
                if let Some(instance_id) = state.resource_id(ResourceSlot::Ecs) {
                    // Already unbound after an interrupted run; release decides
                    match self.cloud.disassociate_floating_ip(id, instance_id).await {
                        Ok(()) => Timings::settle(self.timings.settle_after_disassociate).await,
                        Err(e) => tracing::warn!("Failed to unbind EIP {}: {}", id, e),
                    }
                }
                self.cloud.release_floating_ip(id).await
            }
            ResourceSlot::Ecs => {
                self.cloud.delete_instance(id).await?;
                Timings::settle(self.timings.settle_after_instance_delete).await;
                Ok(())
            }
            ResourceSlot::SshKeyPair => self.cloud.delete_key_pair(id).await,
            ResourceSlot::SecurityGroup => self.cloud.delete_security_group(id).await,
            ResourceSlot::VSwitch => {
                self.cloud.delete_subnet(id).await?;
                Timings::settle(self.timings.settle_after_subnet_delete).await;
                Ok(())
            }
            ResourceSlot::Vpc => self.cloud.delete_network(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_name_format() {
        let name = snapshot_name();
        assert!(name.starts_with("cloudcode-"));
        // cloudcode-YYYYMMDD-HHMMSS
        assert_eq!(name.len(), "cloudcode-".len() + 15);
        assert_eq!(name.as_bytes()["cloudcode-".len() + 8], b'-');
    }

    #[test]
    fn test_plan_uses_teardown_order() {
        let mut state = DeploymentState::new("ap-southeast-1", "ubuntu");
        state.resources.vpc.id = "vpc-1".into();
        state.resources.ecs.id = "i-1".into();
        state.resources.eip.id = "eip-1".into();

        let plan = DestroyPlan::from_state(&state);
        let slots: Vec<_> = plan.resources.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            slots,
            vec![ResourceSlot::Eip, ResourceSlot::Ecs, ResourceSlot::Vpc]
        );
    }
}
