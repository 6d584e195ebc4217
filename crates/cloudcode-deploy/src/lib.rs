//! CloudCode deployment engine
//!
//! Drives one deployment through its life:
//!
//! - [`Provisioner`] creates the six cloud resources, idempotently
//! - [`Installer`] sets up Docker and the application stack over SSH
//! - [`Lifecycle`] suspends and resumes the instance
//! - [`Destroyer`] backs up and tears everything down
//!
//! All cloud access goes through [`cloudcode_cloud::CloudApi`] and all remote
//! access through [`RemoteConnector`], so every flow runs against in-memory
//! fakes in tests.

pub mod destroy;
pub mod dns;
pub mod error;
pub mod install;
pub mod lifecycle;
pub mod prompt;
pub mod provision;
pub mod remote;
pub mod secrets;
pub mod template;
pub mod timing;

pub use destroy::{DestroyOptions, DestroyOutcome, DestroyPlan, Destroyer};
pub use dns::wait_for_dns;
pub use error::{DeployError, Result};
pub use install::{ComponentStatus, InstallOptions, Installer, check_containers};
pub use lifecycle::{Lifecycle, ResumeOutcome, SuspendOutcome};
pub use prompt::Prompter;
pub use provision::{ProvisionOptions, Provisioner, prepare_state};
pub use remote::{FileTransfer, RemoteConnector, RemoteError, RemoteSession, RemoteTarget};
pub use timing::Timings;
