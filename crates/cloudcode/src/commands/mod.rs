pub mod deploy;
pub mod destroy;
pub mod init;
pub mod resume;
pub mod status;
pub mod suspend;

use cloudcode_cloud::{CloudProvider, StateStore};
use cloudcode_cloud_alibaba::AlibabaCloudProvider;
use cloudcode_config::Settings;
use colored::Colorize;

pub fn state_store(settings: &Settings) -> StateStore {
    StateStore::new(&settings.state_dir)
}

/// Build the cloud provider and make sure it can authenticate
pub async fn connect_provider(settings: &Settings) -> anyhow::Result<AlibabaCloudProvider> {
    let credentials = settings.credentials()?;

    let provider = AlibabaCloudProvider::new(
        &credentials.access_key_id,
        &credentials.access_key_secret,
        &settings.region,
    );

    let auth = provider.check_auth().await?;
    if !auth.authenticated {
        return Err(anyhow::anyhow!(
            "{} authentication failed: {}",
            provider.display_name(),
            auth.error.unwrap_or_default()
        ));
    }
    tracing::debug!(
        "Authenticated as {}",
        auth.account_info.as_deref().unwrap_or("unknown")
    );
    println!(
        "{} {} ({})",
        "✓".green(),
        provider.display_name(),
        provider.region().cyan()
    );
    Ok(provider)
}
