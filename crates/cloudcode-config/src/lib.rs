//! CloudCode settings
//!
//! [`Settings`] is built once at startup from the environment and the
//! credentials file, then passed by reference to everything that needs it.
//! Nothing below the CLI reads environment variables on its own.

pub mod error;

pub use error::*;

use std::fmt;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".cloudcode";
pub const CREDENTIALS_FILE: &str = "credentials";
pub const DEFAULT_REGION: &str = "ap-southeast-1";

pub const ENV_ACCESS_KEY_ID: &str = "ALICLOUD_ACCESS_KEY_ID";
pub const ENV_ACCESS_KEY_SECRET: &str = "ALICLOUD_ACCESS_KEY_SECRET";
pub const ENV_REGION: &str = "ALICLOUD_REGION";

/// `~/.cloudcode`
pub fn default_state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(STATE_DIR_NAME))
}

/// Cloud access key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"***")
            .field("region", &self.region)
            .finish()
    }
}

impl Credentials {
    /// Build credentials from environment values.
    ///
    /// Returns `Ok(None)` when neither key is set, and an error naming the
    /// missing variable when only one of them is.
    pub fn from_env_values(
        access_key_id: Option<String>,
        access_key_secret: Option<String>,
        region: Option<String>,
    ) -> Result<Option<Self>> {
        match (non_empty(access_key_id), non_empty(access_key_secret)) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::MissingEnvVar(ENV_ACCESS_KEY_SECRET)),
            (None, Some(_)) => Err(ConfigError::MissingEnvVar(ENV_ACCESS_KEY_ID)),
            (Some(id), Some(secret)) => Ok(Some(Self {
                access_key_id: id,
                access_key_secret: secret,
                region: non_empty(region),
            })),
        }
    }

    /// Load a `key=value` credentials file.
    ///
    /// Blank lines and `#` comments are skipped; each line is split on its
    /// first `=`.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::CredentialsNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut access_key_id = None;
        let mut access_key_secret = None;
        let mut region = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "access_key_id" => access_key_id = Some(value),
                "access_key_secret" => access_key_secret = Some(value),
                "region" => region = Some(value),
                other => tracing::debug!("Ignoring unknown credentials key: {}", other),
            }
        }

        let access_key_id =
            non_empty(access_key_id).ok_or_else(|| ConfigError::IncompleteCredentials {
                path: path.to_path_buf(),
                key: "access_key_id",
            })?;
        let access_key_secret =
            non_empty(access_key_secret).ok_or_else(|| ConfigError::IncompleteCredentials {
                path: path.to_path_buf(),
                key: "access_key_secret",
            })?;

        Ok(Self {
            access_key_id,
            access_key_secret,
            region: non_empty(region),
        })
    }

    /// Write the credentials file with owner-only permissions
    pub fn save_file(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = format!(
            "access_key_id={}\naccess_key_secret={}\nregion={}\n",
            self.access_key_id,
            self.access_key_secret,
            self.region.as_deref().unwrap_or(DEFAULT_REGION)
        );
        std::fs::write(path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub region: String,
    credentials: Option<Credentials>,
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// Credentials come from `ALICLOUD_*` variables, falling back to
    /// `<state_dir>/credentials`. A missing credentials file is not an error
    /// here; commands that talk to the cloud call [`Settings::credentials`].
    pub fn load(state_dir: Option<PathBuf>) -> Result<Self> {
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };

        let env_region = non_empty(std::env::var(ENV_REGION).ok());
        let from_env = Credentials::from_env_values(
            std::env::var(ENV_ACCESS_KEY_ID).ok(),
            std::env::var(ENV_ACCESS_KEY_SECRET).ok(),
            env_region.clone(),
        )?;

        let credentials = match from_env {
            Some(creds) => {
                tracing::debug!("Using credentials from environment");
                Some(creds)
            }
            None => match Credentials::load_file(&state_dir.join(CREDENTIALS_FILE)) {
                Ok(creds) => {
                    tracing::debug!("Using credentials from {}", CREDENTIALS_FILE);
                    Some(creds)
                }
                Err(ConfigError::CredentialsNotFound(_)) => None,
                Err(e) => return Err(e),
            },
        };

        let mut settings = Self::new(state_dir, credentials);
        if let Some(region) = env_region {
            settings.region = region;
        }
        Ok(settings)
    }

    pub fn new(state_dir: PathBuf, credentials: Option<Credentials>) -> Self {
        let region = credentials
            .as_ref()
            .and_then(|c| c.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self {
            state_dir,
            region,
            credentials,
        }
    }

    pub fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ConfigError::CredentialsNotFound(self.credentials_path()))
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join(CREDENTIALS_FILE)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
