use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("{0} environment variable is not set")]
    MissingEnvVar(&'static str),

    #[error(
        "No cloud credentials found. Either set ALICLOUD_ACCESS_KEY_ID and \
        ALICLOUD_ACCESS_KEY_SECRET, or run `cloudcode init` to create {}",
        .0.display()
    )]
    CredentialsNotFound(PathBuf),

    #[error(
        "Credentials file {} is missing '{key}'. Run `cloudcode init` to reconfigure",
        .path.display()
    )]
    IncompleteCredentials { path: PathBuf, key: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
