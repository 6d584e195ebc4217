use crate::prompt::StdinPrompter;
use cloudcode_cloud::CloudProvider;
use cloudcode_cloud_alibaba::AlibabaCloudProvider;
use cloudcode_config::{Credentials, DEFAULT_REGION, Settings};
use cloudcode_deploy::Prompter;
use colored::Colorize;

pub async fn handle(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", "Alibaba Cloud credentials".blue().bold());
    println!("Create an AccessKey in the RAM console with ECS and VPC permissions.");
    println!();

    let prompter = StdinPrompter;
    let access_key_id = prompter.input("AccessKey ID", None)?;
    let access_key_secret = prompter.password("AccessKey secret")?;
    let region = prompter.input("Region", Some(DEFAULT_REGION))?;

    if access_key_id.is_empty() || access_key_secret.is_empty() {
        return Err(anyhow::anyhow!("AccessKey ID and secret are both required"));
    }

    let credentials = Credentials {
        access_key_id,
        access_key_secret,
        region: Some(region),
    };

    let provider = AlibabaCloudProvider::new(
        &credentials.access_key_id,
        &credentials.access_key_secret,
        credentials.region.as_deref().unwrap_or(DEFAULT_REGION),
    );
    let auth = provider.check_auth().await?;
    if auth.authenticated {
        println!(
            "  ✓ Authenticated ({})",
            auth.account_info.unwrap_or_default().cyan()
        );
    } else {
        println!(
            "  ⚠ {}",
            format!(
                "Could not verify credentials: {}",
                auth.error.unwrap_or_default()
            )
            .yellow()
        );
    }

    let path = settings.credentials_path();
    credentials.save_file(&path)?;
    println!("  ✓ Saved to {}", path.display().to_string().cyan());
    println!();
    println!("Next: {}", "cloudcode deploy".bold());
    Ok(())
}
