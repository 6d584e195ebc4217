//! Alibaba Cloud provider for CloudCode
//!
//! Implements the `cloudcode-cloud` capability traits on top of the
//! `aliyun` CLI: VPC, VSwitch, security group, key pair, ECS instance,
//! EIP, and the disk/snapshot/image calls used by backup and restore.
//!
//! # Requirements
//!
//! - `aliyun` CLI must be installed
//! - An access key pair, passed in explicitly (see `cloudcode-config`)
//!
//! # Example
//!
//! ```ignore
//! use cloudcode_cloud::CloudProvider;
//! use cloudcode_cloud_alibaba::AlibabaCloudProvider;
//!
//! let provider = AlibabaCloudProvider::new(key_id, key_secret, "ap-southeast-1");
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

pub mod aliyun;
pub mod error;
pub mod provider;

pub use aliyun::{Aliyun, Product};
pub use error::{AlibabaError, Result};
pub use provider::AlibabaCloudProvider;
