//! DNS propagation check for custom domains

use cloudcode_cloud::{CloudError, PollConfig, poll_until};
use std::net::IpAddr;

/// Wait until `domain` resolves to `expected_ip`.
///
/// Lookup failures count as "not yet". Callers only warn on timeout.
pub async fn wait_for_dns(
    domain: &str,
    expected_ip: &str,
    config: &PollConfig,
) -> Result<(), CloudError> {
    let expected: IpAddr = expected_ip
        .parse()
        .map_err(|_| CloudError::api("DNS check", format!("invalid IP address: {}", expected_ip)))?;

    let operation = format!("{} to resolve to {}", domain, expected_ip);
    poll_until(&operation, config, || async move {
        Ok(resolves_to(domain, expected).await.then_some(()))
    })
    .await
}

/// Whether any address `domain` resolves to equals `expected`
pub async fn resolves_to(domain: &str, expected: IpAddr) -> bool {
    match tokio::net::lookup_host((domain, 443)).await {
        Ok(mut addrs) => addrs.any(|addr| addr.ip() == expected),
        Err(e) => {
            tracing::debug!("Lookup of {} failed: {}", domain, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_localhost_resolves() {
        assert!(resolves_to("127.0.0.1", "127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_invalid_expected_ip() {
        let config = PollConfig::new(Duration::from_millis(1), Duration::from_millis(10));
        let err = wait_for_dns("example.com", "not-an-ip", &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid IP address"));
    }

    #[tokio::test]
    async fn test_mismatch_times_out() {
        let config = PollConfig::new(Duration::from_millis(5), Duration::from_millis(30));
        let err = wait_for_dns("127.0.0.1", "10.9.8.7", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::WaitTimeout { .. }));
    }
}
