//! Deployment error types

use crate::remote::RemoteError;
use cloudcode_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("Failed to save SSH private key: {0}")]
    KeyFile(#[source] CloudError),

    #[error("{step} failed: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("Template rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Secret generation failed: {0}")]
    Secret(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Deployment record has no {0}")]
    MissingResource(&'static str),

    #[error("{} resources failed to delete", .failed.len())]
    TeardownIncomplete { failed: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub(crate) fn remote(step: &'static str) -> impl FnOnce(RemoteError) -> DeployError {
        move |source| DeployError::Remote { step, source }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
