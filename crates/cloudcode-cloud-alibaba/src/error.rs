//! Alibaba Cloud provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlibabaError {
    #[error("aliyun CLI not found. Please install: https://github.com/aliyun/aliyun-cli")]
    CliNotFound,

    #[error("aliyun {action} failed{}: {message}", code_suffix(.code))]
    CommandFailed {
        action: String,
        code: Option<String>,
        message: String,
    },

    #[error("Unexpected response from {action}: {message}")]
    UnexpectedResponse { action: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AlibabaError {
    /// Whether the API rejected the call with the given error code
    pub fn is_error_code(&self, expected: &str) -> bool {
        match self {
            AlibabaError::CommandFailed { code, message, .. } => {
                code.as_deref() == Some(expected) || message.contains(expected)
            }
            _ => false,
        }
    }

    /// Whether the API reported the target as missing, e.g. `InvalidVpcId.NotFound`
    pub fn is_not_found(&self) -> bool {
        match self {
            AlibabaError::CommandFailed { code, .. } => code
                .as_deref()
                .is_some_and(|c| c.ends_with(".NotFound") || c == "NotFound"),
            _ => false,
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(c) => format!(" ({})", c),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, AlibabaError>;
