use cloudcode_cloud::{ProvisionReport, SlotOutcome};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::IpAddr;
use std::time::Duration;

const PUBLIC_IP_URL: &str = "https://api.ipify.org";

/// Spinner shown while waiting on the cloud
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// This machine's public IPv4 address
pub async fn detect_public_ip() -> anyhow::Result<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let body = client
        .get(PUBLIC_IP_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let ip: IpAddr = body
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("unexpected response from {}: {}", PUBLIC_IP_URL, body))?;
    Ok(ip)
}

pub fn print_provision_report(report: &ProvisionReport) {
    for (slot, outcome) in &report.slots {
        match outcome {
            SlotOutcome::Created { id } => {
                println!("  ✓ {} {} created", slot, id.cyan());
            }
            SlotOutcome::AlreadyExists { id } => {
                println!("  - {} {} (already exists)", slot, id);
            }
        }
    }
}

pub fn print_app_urls(domain: &str, username: &str) {
    println!("  URL:      {}", format!("https://{}", domain).cyan().bold());
    println!("  Login:    {}", format!("https://{}:8443", domain).cyan());
    println!("  Username: {}", username.cyan());
}
