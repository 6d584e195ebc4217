//! Application installation over SSH
//!
//! Once the instance is reachable, the installer makes sure Docker is
//! present, renders the Caddy/Authelia/OpenCode configuration with fresh
//! secrets, uploads it and starts the stack with `docker compose`.

use crate::error::{DeployError, Result};
use crate::remote::{RemoteConnector, RemoteSession, RemoteTarget, upload_files};
use crate::secrets::{generate_secret, hash_password};
use crate::template::{REMOTE_DIR, TemplateData, render_all};
use crate::timing::Timings;
use cloudcode_cloud::{
    BackoffConfig, CloudApi, DeploymentState, FloatingIpStatus, StateStore, poll_until,
    retry_with_backoff,
};
use std::fmt;
use std::time::Duration;

pub const DOCKER_INSTALL_CMD: &str = "which docker || (curl -fsSL https://get.docker.com | sh && systemctl enable --now docker)";
pub const MKDIR_CMD: &str = "mkdir -p /root/cloudcode/authelia";
pub const COMPOSE_UP_CMD: &str = "cd /root/cloudcode && docker compose up -d --build";
pub const COMPOSE_PS_CMD: &str = "cd /root/cloudcode && docker compose ps --format '{{.Name}} {{.State}}'";

pub const NIP_IO_SUFFIX: &str = "nip.io";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// `<ip>.nip.io`, used when no custom domain is configured
pub fn nip_io_domain(ip: &str) -> String {
    format!("{}.{}", ip, NIP_IO_SUFFIX)
}

/// What the operator chose for this deployment
#[derive(Clone, Default)]
pub struct InstallOptions {
    /// Custom domain; `<eip>.nip.io` when unset
    pub domain: Option<String>,
    pub username: String,
    pub password: String,
    /// ACME contact address for Caddy
    pub email: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub anthropic_api_key: String,
    pub version: String,
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"***")
            .field("email", &self.email)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .field("version", &self.version)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "***" }
}

/// One container as reported by `docker compose ps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: String,
    pub state: String,
}

impl ComponentStatus {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Parse `docker compose ps --format '{{.Name}} {{.State}}'` output
pub fn parse_compose_ps(output: &str) -> Vec<ComponentStatus> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next().unwrap_or("unknown");
            Some(ComponentStatus {
                name: name.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

pub struct Installer<'a> {
    cloud: &'a dyn CloudApi,
    connector: &'a dyn RemoteConnector,
    store: &'a StateStore,
    timings: &'a Timings,
}

impl<'a> Installer<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        connector: &'a dyn RemoteConnector,
        store: &'a StateStore,
        timings: &'a Timings,
    ) -> Self {
        Self {
            cloud,
            connector,
            store,
            timings,
        }
    }

    fn target(&self, state: &DeploymentState) -> Result<RemoteTarget> {
        RemoteTarget::for_deployment(state, self.store).ok_or(DeployError::MissingResource("EIP"))
    }

    /// Wait until the floating IP reports as bound to the instance
    pub async fn wait_for_floating_ip(&self, state: &DeploymentState) -> Result<()> {
        let allocation_id = state.resources.eip.id.clone();
        if allocation_id.is_empty() {
            return Err(DeployError::MissingResource("EIP"));
        }

        let cloud = self.cloud;
        poll_until("EIP to be bound", &self.timings.floating_ip_poll, || {
            let allocation_id = allocation_id.clone();
            async move {
                let status = cloud.floating_ip_status(&allocation_id).await?;
                Ok((status == FloatingIpStatus::InUse).then_some(()))
            }
        })
        .await?;
        Ok(())
    }

    /// Open a session, retrying while the instance boots
    pub async fn connect(
        &self,
        state: &DeploymentState,
        backoff: &BackoffConfig,
    ) -> Result<Box<dyn RemoteSession>> {
        let target = self.target(state)?;
        open_session(self.connector, &target, backoff).await
    }

    /// Install and start the application stack.
    ///
    /// Returns the domain the application is served on. The chosen username
    /// and domain are recorded in the deployment record.
    pub async fn install(
        &self,
        state: &mut DeploymentState,
        options: &InstallOptions,
    ) -> Result<String> {
        let session = self.connect(state, &self.timings.ssh_backoff).await?;
        let result = self.install_with(session.as_ref(), state, options).await;
        if let Err(e) = session.close().await {
            tracing::debug!("Closing SSH session failed: {}", e);
        }
        let domain = result?;

        state.cloudcode.username = options.username.clone();
        state.cloudcode.domain = domain.clone();
        self.store.save(state).await?;
        Ok(domain)
    }

    async fn install_with(
        &self,
        session: &dyn RemoteSession,
        state: &DeploymentState,
        options: &InstallOptions,
    ) -> Result<String> {
        tracing::info!("Ensuring Docker is installed");
        session
            .run(DOCKER_INSTALL_CMD, self.timings.install_timeout)
            .await
            .map_err(DeployError::remote("Docker installation"))?;

        session
            .run(MKDIR_CMD, self.timings.command_timeout)
            .await
            .map_err(DeployError::remote("Creating remote directories"))?;

        let domain = match options.domain.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => nip_io_domain(&state.resources.eip.ip),
        };

        let data = TemplateData {
            domain: domain.clone(),
            username: options.username.clone(),
            hashed_password: hash_password(&options.password)?,
            email: options.email.clone(),
            session_secret: generate_secret(),
            storage_encryption_key: generate_secret(),
            openai_api_key: options.openai_api_key.clone(),
            openai_base_url: options.openai_base_url.clone(),
            anthropic_api_key: options.anthropic_api_key.clone(),
            version: options.version.clone(),
        };
        let files = render_all(&data)?;

        let target = self.target(state)?;
        let transfer = self
            .connector
            .open_transfer(&target)
            .await
            .map_err(DeployError::remote("Opening file transfer"))?;
        let uploaded = upload_files(transfer.as_ref(), &files).await;
        if let Err(e) = transfer.close().await {
            tracing::debug!("Closing file transfer failed: {}", e);
        }
        uploaded.map_err(DeployError::remote("Uploading configuration"))?;
        tracing::info!("Uploaded {} files to {}", files.len(), REMOTE_DIR);

        tracing::info!("Starting containers");
        session
            .run(COMPOSE_UP_CMD, self.timings.install_timeout)
            .await
            .map_err(DeployError::remote("Starting containers"))?;

        Ok(domain)
    }

    /// Container status on the instance.
    ///
    /// Connection attempts are bounded by `budget`. Callers treat failures as
    /// warnings.
    pub async fn health_check(
        &self,
        state: &DeploymentState,
        budget: Duration,
    ) -> Result<Vec<ComponentStatus>> {
        let target = self.target(state)?;
        check_containers(self.connector, &target, &self.timings.ssh_backoff, budget).await
    }
}

/// Open a session to `target`, retrying while the instance boots
pub async fn open_session(
    connector: &dyn RemoteConnector,
    target: &RemoteTarget,
    backoff: &BackoffConfig,
) -> Result<Box<dyn RemoteSession>> {
    let operation = format!("connect to {}", target.host);
    let session =
        retry_with_backoff(&operation, backoff, || connector.open_session(target)).await?;
    Ok(session)
}

/// Run `docker compose ps` on the instance within `budget`
pub async fn check_containers(
    connector: &dyn RemoteConnector,
    target: &RemoteTarget,
    backoff: &BackoffConfig,
    budget: Duration,
) -> Result<Vec<ComponentStatus>> {
    let session = open_session(connector, target, &backoff.with_timeout(budget)).await?;
    let output = session.run(COMPOSE_PS_CMD, budget).await;
    if let Err(e) = session.close().await {
        tracing::debug!("Closing SSH session failed: {}", e);
    }
    let output = output.map_err(DeployError::remote("Health check"))?;
    Ok(parse_compose_ps(&output))
}
