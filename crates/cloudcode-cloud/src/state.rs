//! Deployment record persistence
//!
//! Manages the `~/.cloudcode/` directory: `state.json` tracks every cloud
//! resource the deployment owns, `backup.json` remembers the last disk
//! snapshot, `ssh_key` holds the instance's private key and `lock.json`
//! guards against concurrent invocations.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const STATE_VERSION: &str = "1.0";
const SUPPORTED_MAJOR: u32 = 1;

const STATE_FILE: &str = "state.json";
const BACKUP_FILE: &str = "backup.json";
const KEY_FILE: &str = "ssh_key";
const LOCK_FILE: &str = "lock.json";

/// Durable record of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub region: String,
    pub os_image: String,

    /// Absent on records written before the first suspend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LifecyclePhase>,

    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub cloudcode: AppConfig,
}

impl DeploymentState {
    pub fn new(region: impl Into<String>, os_image: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            created_at: Utc::now(),
            region: region.into(),
            os_image: os_image.into(),
            status: None,
            resources: Resources::default(),
            cloudcode: AppConfig::default(),
        }
    }

    pub fn is_populated(&self, slot: ResourceSlot) -> bool {
        self.resource_id(slot).is_some()
    }

    /// Identifier held by a slot; the key pair is identified by its name
    pub fn resource_id(&self, slot: ResourceSlot) -> Option<&str> {
        let r = &self.resources;
        let id = match slot {
            ResourceSlot::Vpc => &r.vpc.id,
            ResourceSlot::VSwitch => &r.vswitch.id,
            ResourceSlot::SecurityGroup => &r.security_group.id,
            ResourceSlot::SshKeyPair => &r.ssh_key_pair.name,
            ResourceSlot::Ecs => &r.ecs.id,
            ResourceSlot::Eip => &r.eip.id,
        };
        if id.is_empty() { None } else { Some(id) }
    }

    /// Reset a slot to empty after the resource was deleted
    pub fn clear(&mut self, slot: ResourceSlot) {
        let r = &mut self.resources;
        match slot {
            ResourceSlot::Vpc => r.vpc = VpcResource::default(),
            ResourceSlot::VSwitch => r.vswitch = VSwitchResource::default(),
            ResourceSlot::SecurityGroup => r.security_group = SecurityGroupResource::default(),
            ResourceSlot::SshKeyPair => r.ssh_key_pair = SshKeyPairResource::default(),
            ResourceSlot::Ecs => r.ecs = EcsResource::default(),
            ResourceSlot::Eip => {
                r.eip = EipResource::default();
                r.ecs.public_ip.clear();
            }
        }
    }

    /// Populated slots in creation order
    pub fn populated(&self) -> Vec<ResourceSlot> {
        ResourceSlot::ALL
            .into_iter()
            .filter(|s| self.is_populated(*s))
            .collect()
    }

    /// All six slots populated
    pub fn is_complete(&self) -> bool {
        ResourceSlot::ALL.iter().all(|s| self.is_populated(*s))
    }

    /// An absent phase is treated as running
    pub fn is_running(&self) -> bool {
        matches!(self.status, None | Some(LifecyclePhase::Running))
    }
}

/// Lifecycle phase of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Running,
    Suspended,
    Destroyed,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Running => write!(f, "running"),
            LifecyclePhase::Suspended => write!(f, "suspended"),
            LifecyclePhase::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// The six resource slots of the fixed topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceSlot {
    Vpc,
    VSwitch,
    SecurityGroup,
    SshKeyPair,
    Ecs,
    Eip,
}

impl ResourceSlot {
    /// Creation order
    pub const ALL: [ResourceSlot; 6] = [
        ResourceSlot::Vpc,
        ResourceSlot::VSwitch,
        ResourceSlot::SecurityGroup,
        ResourceSlot::SshKeyPair,
        ResourceSlot::Ecs,
        ResourceSlot::Eip,
    ];

    /// Reverse-dependency order used by teardown
    pub const TEARDOWN: [ResourceSlot; 6] = [
        ResourceSlot::Eip,
        ResourceSlot::Ecs,
        ResourceSlot::SshKeyPair,
        ResourceSlot::SecurityGroup,
        ResourceSlot::VSwitch,
        ResourceSlot::Vpc,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ResourceSlot::Vpc => "VPC",
            ResourceSlot::VSwitch => "VSwitch",
            ResourceSlot::SecurityGroup => "Security group",
            ResourceSlot::SshKeyPair => "SSH key pair",
            ResourceSlot::Ecs => "ECS instance",
            ResourceSlot::Eip => "EIP",
        }
    }
}

impl fmt::Display for ResourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub vpc: VpcResource,
    pub vswitch: VSwitchResource,
    pub security_group: SecurityGroupResource,
    pub ecs: EcsResource,
    pub eip: EipResource,
    pub ssh_key_pair: SshKeyPairResource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpcResource {
    pub id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VSwitchResource {
    pub id: String,
    pub zone: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGroupResource {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsResource {
    pub id: String,
    pub instance_type: String,
    pub system_disk_size: u32,
    pub public_ip: String,
    pub private_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EipResource {
    pub id: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshKeyPairResource {
    pub name: String,
    pub private_key_path: String,
}

/// Application settings recorded after installation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub username: String,
    pub domain: String,
}

/// Sidecar record of the last disk snapshot, used to restore on redeploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub cloudcode_version: String,
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub region: String,
    pub disk_size: u32,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub username: String,
}

/// Reads and writes the files in the state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Ensure the state directory exists with owner-only permissions
    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created state directory: {}", self.dir.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    /// Load the deployment record
    pub async fn load(&self) -> Result<DeploymentState> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CloudError::StateNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let state: DeploymentState = serde_json::from_str(&content)
            .map_err(|e| CloudError::StateCorrupted(format!("{}: {}", path.display(), e)))?;

        check_version(&state.version)?;

        tracing::debug!(
            "Loaded state with {} populated resources",
            state.populated().len()
        );
        Ok(state)
    }

    /// Load the deployment record, or `None` when there is none
    pub async fn load_optional(&self) -> Result<Option<DeploymentState>> {
        match self.load().await {
            Ok(state) => Ok(Some(state)),
            Err(CloudError::StateNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist the deployment record
    pub async fn save(&self, state: &DeploymentState) -> Result<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(state)?;
        write_private(&self.state_path(), content.as_bytes()).await?;
        tracing::debug!(
            "Saved state with {} populated resources",
            state.populated().len()
        );
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        remove_if_exists(&self.state_path()).await
    }

    pub async fn load_backup(&self) -> Result<Option<Backup>> {
        let content = match fs::read_to_string(self.backup_path()).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub async fn save_backup(&self, backup: &Backup) -> Result<()> {
        self.ensure_dir().await?;
        let content = serde_json::to_string_pretty(backup)?;
        write_private(&self.backup_path(), content.as_bytes()).await
    }

    pub async fn delete_backup(&self) -> Result<()> {
        remove_if_exists(&self.backup_path()).await
    }

    /// Write the instance private key (mode 0600) and return its path
    pub async fn write_private_key(&self, private_key: &str) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let path = self.key_path();
        write_private(&path, private_key.as_bytes()).await?;
        Ok(path)
    }

    pub async fn remove_private_key(&self) -> Result<()> {
        remove_if_exists(&self.key_path()).await
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            match serde_json::from_str::<LockInfo>(&content) {
                Ok(lock_info) => {
                    // Locks older than an hour are considered abandoned
                    let age = Utc::now().signed_duration_since(lock_info.acquired_at);
                    if age.num_hours() < 1 {
                        return Err(CloudError::LockError(format!(
                            "another cloudcode command ({}) has held the state since {}",
                            lock_info.holder, lock_info.acquired_at
                        )));
                    }
                    tracing::warn!("Removing stale lock from {}", lock_info.holder);
                }
                Err(e) => tracing::warn!("Replacing unreadable lock file: {}", e),
            }
        }

        let lock_info = LockInfo {
            holder: format!("{} (pid {})", hostname(), std::process::id()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

fn check_version(version: &str) -> Result<()> {
    let major = version
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .ok_or_else(|| CloudError::StateCorrupted(format!("invalid version '{}'", version)))?;

    if major > SUPPORTED_MAJOR {
        return Err(CloudError::IncompatibleState {
            found: version.to_string(),
            supported: STATE_VERSION.to_string(),
        });
    }
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Write through a temporary sibling and rename over the target
async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = fs::File::create(&tmp).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            remove_if_exists(&self.lock_path).await?;
            tracing::debug!("Released state lock");
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populated_state() -> DeploymentState {
        let mut state = DeploymentState::new("ap-southeast-1", "ubuntu");
        state.resources.vpc = VpcResource {
            id: "vpc-1".into(),
            cidr: "192.168.0.0/16".into(),
        };
        state.resources.vswitch = VSwitchResource {
            id: "vsw-1".into(),
            zone: "ap-southeast-1a".into(),
            cidr: "192.168.1.0/24".into(),
        };
        state.resources.security_group.id = "sg-1".into();
        state.resources.ssh_key_pair.name = "cloudcode-ssh-key".into();
        state.resources.ecs.id = "i-1".into();
        state.resources.eip = EipResource {
            id: "eip-1".into(),
            ip: "47.0.0.1".into(),
        };
        state.resources.ecs.public_ip = "47.0.0.1".into();
        state
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path().join(".cloudcode"));

        let state = populated_state();
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.is_complete());
    }

    #[tokio::test]
    async fn test_missing_state() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        assert!(matches!(store.load().await, Err(CloudError::StateNotFound)));
        assert!(store.load_optional().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());
        std::fs::write(store.state_path(), "{ not json").unwrap();

        assert!(matches!(
            store.load().await,
            Err(CloudError::StateCorrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());
        let mut state = DeploymentState::new("ap-southeast-1", "ubuntu");
        state.version = "2.0".into();
        store.save(&state).await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(CloudError::IncompatibleState { .. })
        ));
    }

    #[test]
    fn test_status_omitted_when_absent() {
        let state = DeploymentState::new("ap-southeast-1", "ubuntu");
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("status").is_none());
        assert!(state.is_running());

        let mut suspended = state.clone();
        suspended.status = Some(LifecyclePhase::Suspended);
        let json = serde_json::to_value(&suspended).unwrap();
        assert_eq!(json["status"], "suspended");
        assert!(!suspended.is_running());
    }

    #[test]
    fn test_clear_slot() {
        let mut state = populated_state();
        state.clear(ResourceSlot::Eip);

        assert!(!state.is_populated(ResourceSlot::Eip));
        assert!(state.resources.ecs.public_ip.is_empty());
        assert!(!state.is_complete());
        assert_eq!(state.populated().len(), 5);
    }

    #[tokio::test]
    async fn test_backup_missing_is_none() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());
        assert!(store.load_backup().await.unwrap().is_none());

        let backup = Backup {
            cloudcode_version: "0.4.0".into(),
            snapshot_id: "s-1".into(),
            created_at: Utc::now(),
            region: "ap-southeast-1".into(),
            disk_size: 60,
            domain: "example.com".into(),
            username: "admin".into(),
        };
        store.save_backup(&backup).await.unwrap();
        assert_eq!(store.load_backup().await.unwrap(), Some(backup));

        store.delete_backup().await.unwrap();
        assert!(store.load_backup().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path().join("state"));
        store.save(&populated_state()).await.unwrap();
        let key = store.write_private_key("-----BEGIN KEY-----").await.unwrap();

        let dir_mode = std::fs::metadata(store.dir()).unwrap().permissions().mode();
        let state_mode = std::fs::metadata(store.state_path())
            .unwrap()
            .permissions()
            .mode();
        let key_mode = std::fs::metadata(&key).unwrap().permissions().mode();

        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(state_mode & 0o777, 0o600);
        assert_eq!(key_mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_remove_private_key_when_absent() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());
        store.remove_private_key().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_contention() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let lock = store.acquire_lock().await.unwrap();
        assert!(matches!(
            store.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));

        lock.release().await.unwrap();
        let again = store.acquire_lock().await.unwrap();
        drop(again);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }
}
