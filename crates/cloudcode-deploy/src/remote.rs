//! Remote transport abstraction
//!
//! The installer runs shell commands and writes files on the instance. How
//! that happens (OpenSSH, an in-process client, a fake) is behind these
//! traits.

use async_trait::async_trait;
use cloudcode_cloud::{DeploymentState, StateStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const SSH_PORT: u16 = 22;
pub const SSH_USER: &str = "root";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("writing {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity_file: PathBuf,
}

impl RemoteTarget {
    /// Root on the deployment's floating IP, authenticated with the stored key
    pub fn for_deployment(state: &DeploymentState, store: &StateStore) -> Option<Self> {
        let host = &state.resources.eip.ip;
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.clone(),
            port: SSH_PORT,
            user: SSH_USER.to_string(),
            identity_file: store.key_path(),
        })
    }
}

/// Opens sessions and file transfers to a target
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open_session(
        &self,
        target: &RemoteTarget,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;

    async fn open_transfer(
        &self,
        target: &RemoteTarget,
    ) -> Result<Box<dyn FileTransfer>, RemoteError>;
}

/// A shell session on the instance
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command, returning its stdout. A non-zero exit is an error.
    async fn run(&self, command: &str, timeout: Duration) -> Result<String, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Writes files on the instance
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Write `contents` to an absolute path, creating parent directories
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Upload every file in the map
pub async fn upload_files(
    transfer: &dyn FileTransfer,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<(), RemoteError> {
    for (path, contents) in files {
        transfer.write_file(path, contents).await?;
        tracing::debug!("Uploaded {} ({} bytes)", path, contents.len());
    }
    Ok(())
}
