//! Cloud layer error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the cloud layer: provider calls, state persistence and waits
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("No deployment record found. Run `cloudcode deploy` first")]
    StateNotFound,

    #[error("Deployment record is corrupted: {0}")]
    StateCorrupted(String),

    #[error("Deployment record version {found} is not supported (expected {supported})")]
    IncompatibleState { found: String, supported: String },

    #[error("No zone in the priority list can host new instances")]
    NoAvailableZone,

    #[error("Timed out after {timeout:?} waiting for {operation}{}", format_last(.last_error))]
    WaitTimeout {
        operation: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("Could not {operation} within {timeout:?}: {last_error}")]
    ConnectTimeout {
        operation: String,
        timeout: Duration,
        last_error: String,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("{operation} failed: {message}")]
    ApiError { operation: String, message: String },

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

fn format_last(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
