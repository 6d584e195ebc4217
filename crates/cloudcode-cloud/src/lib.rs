//! CloudCode cloud layer
//!
//! Everything the deployment engine needs to know about the cloud, without
//! committing to a particular vendor:
//!
//! - capability traits for each resource family ([`provider`])
//! - the durable deployment record and its on-disk layout ([`state`])
//! - polling and backoff primitives with monotonic deadlines ([`wait`])
//! - provisioning and teardown reports ([`report`])
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  cloudcode CLI                   │
//! │        (deploy / status / suspend / destroy)     │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                cloudcode-deploy                  │
//! │     Provisioner · Installer · Lifecycle          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                cloudcode-cloud                   │
//! │  trait CloudApi · StateStore · poll/backoff      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼────────┐
//!           │ alibaba-cloud  │
//!           │ (aliyun CLI)   │
//!           └────────────────┘
//! ```

pub mod error;
pub mod provider;
pub mod report;
pub mod state;
pub mod wait;

// Re-exports
pub use error::{CloudError, Result};
pub use provider::{
    AuthStatus, CloudApi, CloudProvider, ComputeApi, FirewallApi, FloatingIp, FloatingIpApi,
    FloatingIpStatus, ImageStatus, IngressRule, InstanceInfo, InstanceSpec, InstanceStatus,
    KeyPairApi, KeyPairMaterial, NetworkApi, NetworkInfo, NetworkStatus, SnapshotStatus,
    StopMode, StorageApi, SubnetInfo, ZoneInfo,
};
pub use report::{ProvisionReport, SlotOutcome, TeardownFailure, TeardownReport};
pub use state::{
    AppConfig, Backup, DeploymentState, LifecyclePhase, ResourceSlot, Resources, STATE_VERSION,
    StateLock, StateStore,
};
pub use wait::{BackoffConfig, PollConfig, poll_until, retry_with_backoff};
