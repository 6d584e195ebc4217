//! Suspend and resume transitions

use crate::error::{DeployError, Result};
use crate::install::{ComponentStatus, Installer};
use crate::prompt::Prompter;
use crate::remote::RemoteConnector;
use crate::timing::Timings;
use cloudcode_cloud::{
    CloudApi, CloudError, DeploymentState, InstanceStatus, LifecyclePhase, PollConfig,
    ResourceSlot, StateStore, StopMode, poll_until,
};

const REDEPLOY_HINT: &str = "run `cloudcode deploy` to create a new one";

#[derive(Debug)]
pub enum SuspendOutcome {
    AlreadySuspended,
    Cancelled,
    Suspended,
}

#[derive(Debug)]
pub enum ResumeOutcome {
    AlreadyRunning,
    Cancelled,
    /// The instance is running again. `health` carries the container status,
    /// or the reason it could not be read.
    Resumed {
        health: std::result::Result<Vec<ComponentStatus>, String>,
    },
}

pub struct Lifecycle<'a> {
    cloud: &'a dyn CloudApi,
    store: &'a StateStore,
    prompter: &'a dyn Prompter,
    connector: &'a dyn RemoteConnector,
    timings: &'a Timings,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        store: &'a StateStore,
        prompter: &'a dyn Prompter,
        connector: &'a dyn RemoteConnector,
        timings: &'a Timings,
    ) -> Self {
        Self {
            cloud,
            store,
            prompter,
            connector,
            timings,
        }
    }

    /// Stop the instance in a mode that releases compute billing
    pub async fn suspend(&self, assume_yes: bool) -> Result<SuspendOutcome> {
        let mut state = self.store.load().await?;

        match state.status {
            Some(LifecyclePhase::Suspended) => return Ok(SuspendOutcome::AlreadySuspended),
            Some(LifecyclePhase::Destroyed) => {
                return Err(DeployError::InvalidTransition(format!(
                    "Cannot suspend: the deployment was destroyed; {}",
                    REDEPLOY_HINT
                )));
            }
            Some(LifecyclePhase::Running) | None => {}
        }

        let instance_id = instance_id(&state)?;

        if !assume_yes
            && !self.prompter.confirm(
                "Stop the ECS instance? Compute billing stops; disk and EIP are still charged",
                true,
            )?
        {
            return Ok(SuspendOutcome::Cancelled);
        }

        self.cloud
            .stop_instance(&instance_id, StopMode::StopCharging)
            .await?;
        wait_for_status(
            self.cloud,
            &instance_id,
            InstanceStatus::Stopped,
            &self.timings.instance_poll,
        )
        .await?;

        state.status = Some(LifecyclePhase::Suspended);
        self.store.save(&state).await?;
        tracing::info!("Suspended instance {}", instance_id);
        Ok(SuspendOutcome::Suspended)
    }

    /// Start the instance again and check the containers came back
    pub async fn resume(&self, assume_yes: bool) -> Result<ResumeOutcome> {
        let mut state = self.store.load().await?;

        match state.status {
            Some(LifecyclePhase::Suspended) => {}
            Some(LifecyclePhase::Destroyed) => {
                return Err(DeployError::InvalidTransition(format!(
                    "Cannot resume: the deployment was destroyed; {}",
                    REDEPLOY_HINT
                )));
            }
            Some(LifecyclePhase::Running) | None => return Ok(ResumeOutcome::AlreadyRunning),
        }

        let instance_id = instance_id(&state)?;

        if !assume_yes && !self.prompter.confirm("Start the ECS instance?", true)? {
            return Ok(ResumeOutcome::Cancelled);
        }

        self.cloud.start_instance(&instance_id).await?;
        wait_for_status(
            self.cloud,
            &instance_id,
            InstanceStatus::Running,
            &self.timings.instance_poll,
        )
        .await?;

        state.status = Some(LifecyclePhase::Running);
        self.store.save(&state).await?;
        tracing::info!("Resumed instance {}", instance_id);

        let installer = Installer::new(self.cloud, self.connector, self.store, self.timings);
        let health = installer
            .health_check(&state, self.timings.health_check_timeout)
            .await
            .map_err(|e| e.to_string());
        if let Err(e) = &health {
            tracing::warn!("Health check after resume failed: {}", e);
        }

        Ok(ResumeOutcome::Resumed { health })
    }
}

fn instance_id(state: &DeploymentState) -> Result<String> {
    state
        .resource_id(ResourceSlot::Ecs)
        .map(str::to_string)
        .ok_or(DeployError::MissingResource("ECS instance"))
}

/// Poll until the instance reports `wanted`
pub(crate) async fn wait_for_status(
    cloud: &dyn CloudApi,
    instance_id: &str,
    wanted: InstanceStatus,
    config: &PollConfig,
) -> std::result::Result<(), CloudError> {
    let operation = format!("ECS instance to be {}", wanted);
    poll_until(&operation, config, || {
        let wanted = wanted.clone();
        async move {
            let info = cloud.describe_instance(instance_id).await?;
            Ok((info.status == wanted).then_some(()))
        }
    })
    .await
}
