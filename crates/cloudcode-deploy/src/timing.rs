//! Wait and settle timings

use cloudcode_cloud::{BackoffConfig, PollConfig};
use std::time::Duration;

/// Every interval and timeout the engine uses, in one place
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    /// Instance state transitions
    pub instance_poll: PollConfig,
    /// VPC becoming available
    pub network_poll: PollConfig,
    /// Snapshots and images
    pub storage_poll: PollConfig,
    /// Floating IP reporting as bound
    pub floating_ip_poll: PollConfig,
    /// DNS propagation for custom domains
    pub dns_poll: PollConfig,

    /// Opening the first SSH session to a fresh instance
    pub ssh_backoff: BackoffConfig,
    /// SSH budget for the post-deploy health check
    pub health_check_timeout: Duration,
    /// SSH budget for `status`
    pub status_check_timeout: Duration,

    /// Plain remote commands
    pub command_timeout: Duration,
    /// Docker installation and `docker compose up --build`
    pub install_timeout: Duration,

    /// Pause after a floating IP is disassociated
    pub settle_after_disassociate: Duration,
    /// Pause after the instance is deleted
    pub settle_after_instance_delete: Duration,
    /// Pause after the subnet is deleted
    pub settle_after_subnet_delete: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            instance_poll: PollConfig::new(Duration::from_secs(5), Duration::from_secs(5 * 60)),
            network_poll: PollConfig::new(Duration::from_secs(2), Duration::from_secs(60)),
            storage_poll: PollConfig::new(Duration::from_secs(5), Duration::from_secs(10 * 60)),
            floating_ip_poll: PollConfig::new(Duration::from_secs(2), Duration::from_secs(2 * 60)),
            dns_poll: PollConfig::new(Duration::from_secs(5), Duration::from_secs(5 * 60)),
            ssh_backoff: BackoffConfig::default(),
            health_check_timeout: Duration::from_secs(30),
            status_check_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5 * 60),
            install_timeout: Duration::from_secs(10 * 60),
            settle_after_disassociate: Duration::from_secs(5),
            settle_after_instance_delete: Duration::from_secs(10),
            settle_after_subnet_delete: Duration::from_secs(5),
        }
    }
}

impl Timings {
    /// Millisecond-scale timings for tests against in-memory fakes
    pub fn immediate() -> Self {
        let poll = PollConfig::new(Duration::from_millis(1), Duration::from_secs(2));
        Self {
            instance_poll: poll,
            network_poll: poll,
            storage_poll: poll,
            floating_ip_poll: poll,
            dns_poll: poll,
            ssh_backoff: BackoffConfig {
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(4),
                timeout: Duration::from_secs(2),
                multiplier: 2.0,
            },
            health_check_timeout: Duration::from_secs(1),
            status_check_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            install_timeout: Duration::from_secs(1),
            settle_after_disassociate: Duration::ZERO,
            settle_after_instance_delete: Duration::ZERO,
            settle_after_subnet_delete: Duration::ZERO,
        }
    }

    pub(crate) async fn settle(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
