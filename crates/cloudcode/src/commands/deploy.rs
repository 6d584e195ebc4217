use crate::AiProvider;
use crate::prompt::StdinPrompter;
use crate::ssh::OpenSshConnector;
use crate::utils;
use anyhow::Context;
use clap::ValueEnum;
use cloudcode_cloud::{Backup, LifecyclePhase, ResourceSlot};
use cloudcode_config::Settings;
use cloudcode_deploy::install::{DEFAULT_OPENAI_BASE_URL, DEFAULT_USERNAME, NIP_IO_SUFFIX};
use cloudcode_deploy::provision::zone_priority;
use cloudcode_deploy::{
    InstallOptions, Installer, Prompter, ProvisionOptions, Provisioner, Timings, prepare_state,
    wait_for_dns,
};
use colored::Colorize;
use std::net::IpAddr;

const PASSWORD_ATTEMPTS: usize = 3;

pub struct DeployArgs {
    pub force: bool,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub provider: Option<AiProvider>,
    pub base_url: Option<String>,
    pub restrict_ssh: bool,
    pub ssh_source: Option<String>,
    pub yes: bool,
}

pub async fn handle(settings: &Settings, args: DeployArgs) -> anyhow::Result<()> {
    println!("{}", "Deploying CloudCode...".blue().bold());

    let store = super::state_store(settings);
    if let Some(existing) = store.load_optional().await? {
        if existing.status == Some(LifecyclePhase::Suspended) {
            anyhow::bail!(
                "The deployment is suspended and its instance is stopped. Run `cloudcode resume` first"
            );
        }
    }

    let provider = super::connect_provider(settings).await?;
    let lock = store.acquire_lock().await?;

    let (mut state, restore) = prepare_state(&store, &settings.region).await?;

    if state.is_complete() && !args.force {
        println!();
        println!("{}", "CloudCode is already deployed.".green());
        if !state.cloudcode.domain.is_empty() {
            utils::print_app_urls(&state.cloudcode.domain, &state.cloudcode.username);
        }
        println!(
            "Use {} to reinstall the application.",
            "cloudcode deploy --force".bold()
        );
        lock.release().await?;
        return Ok(());
    }

    let prompter = StdinPrompter;

    let restore = match restore {
        Some(backup) if use_backup(&prompter, &args, &backup)? => Some(backup),
        _ => None,
    };

    println!();
    println!("{}", "Configuration".bold());
    let install = collect_install_options(&prompter, &args, restore.as_ref())?;

    let ssh_source = if state.is_populated(ResourceSlot::SecurityGroup) {
        None
    } else {
        resolve_ssh_source(&prompter, &args).await?
    };

    let timings = Timings::default();

    if !state.is_complete() {
        println!();
        println!("{}", "Cloud resources".bold());
        let options = ProvisionOptions {
            ssh_source,
            zone_priority: zone_priority(&settings.region),
            restore,
        };

        let pb = utils::spinner("Creating cloud resources...");
        let result = Provisioner::new(&provider, &store, &timings)
            .ensure_provisioned(&mut state, &options)
            .await;
        pb.finish_and_clear();

        let report = result.context(
            "Provisioning stopped. Run `cloudcode deploy` again to resume; created resources are kept",
        )?;
        utils::print_provision_report(&report);
    }

    println!();
    println!("{}", "Application".bold());
    let connector = OpenSshConnector;
    let installer = Installer::new(&provider, &connector, &store, &timings);

    let pb = utils::spinner("Waiting for the EIP to be bound...");
    if let Err(e) = installer.wait_for_floating_ip(&state).await {
        pb.suspend(|| println!("  ⚠ {}", e.to_string().yellow()));
    }

    pb.set_message("Installing Docker and starting containers (this takes a few minutes)...");
    let result = installer.install(&mut state, &install).await;
    pb.finish_and_clear();
    let domain = result.context("Installation failed. Run `cloudcode deploy --force` to retry")?;
    println!("  ✓ Application installed");

    if install.domain.is_some() {
        check_dns(&domain, &state.resources.eip.ip, &timings).await;
    }

    let pb = utils::spinner("Checking containers...");
    let health = installer
        .health_check(&state, timings.health_check_timeout)
        .await;
    pb.finish_and_clear();
    match health {
        Ok(components) => {
            for c in components {
                if c.is_running() {
                    println!("  ✓ {} {}", c.name.cyan(), c.state);
                } else {
                    println!("  ⚠ {} {}", c.name.yellow(), c.state);
                }
            }
        }
        Err(e) => println!(
            "  ⚠ {}",
            format!("Health check failed: {}", e).yellow()
        ),
    }

    lock.release().await?;

    println!();
    println!("{}", "✓ CloudCode is ready".green().bold());
    utils::print_app_urls(&domain, &install.username);
    Ok(())
}

fn use_backup(prompter: &dyn Prompter, args: &DeployArgs, backup: &Backup) -> anyhow::Result<bool> {
    println!(
        "Found a backup from {} (snapshot {}).",
        backup.created_at.format("%Y-%m-%d %H:%M UTC"),
        backup.snapshot_id.cyan()
    );
    if args.yes {
        return Ok(true);
    }
    Ok(prompter.confirm("Restore it?", true)?)
}

fn collect_install_options(
    prompter: &dyn Prompter,
    args: &DeployArgs,
    restore: Option<&Backup>,
) -> anyhow::Result<InstallOptions> {
    let previous_domain = restore
        .map(|b| b.domain.as_str())
        .filter(|d| !d.is_empty() && !d.ends_with(NIP_IO_SUFFIX));
    let domain = match &args.domain {
        Some(d) => Some(d.clone()),
        None if args.yes => previous_domain.map(str::to_string),
        None => {
            let d = prompter.input(
                "Domain (empty for <ip>.nip.io)",
                previous_domain,
            )?;
            (!d.is_empty()).then_some(d)
        }
    };

    let default_username = restore
        .map(|b| b.username.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_USERNAME);
    let username = match &args.username {
        Some(u) => u.clone(),
        None if args.yes => default_username.to_string(),
        None => prompter.input("Username", Some(default_username))?,
    };

    let password = read_new_password(prompter)?;

    let email = match &args.email {
        Some(e) => e.clone(),
        None if args.yes => String::new(),
        None => prompter.input("Email for TLS certificates (optional)", None)?,
    };

    let provider = match args.provider {
        Some(p) => p,
        None if args.yes => AiProvider::Openai,
        None => {
            let answer = prompter.input("AI provider (openai, anthropic, custom)", Some("openai"))?;
            AiProvider::from_str(&answer, true)
                .map_err(|_| anyhow::anyhow!("Unknown AI provider: {}", answer))?
        }
    };

    let mut options = InstallOptions {
        domain,
        username,
        password,
        email,
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..InstallOptions::default()
    };

    match provider {
        AiProvider::Openai => {
            options.openai_api_key = prompter.password("OpenAI API key")?;
            options.openai_base_url = args
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        }
        AiProvider::Custom => {
            options.openai_api_key = prompter.password("API key")?;
            options.openai_base_url = match &args.base_url {
                Some(url) => url.clone(),
                None => prompter.input("API base URL", None)?,
            };
            if options.openai_base_url.is_empty() {
                return Err(anyhow::anyhow!("A base URL is required for a custom provider"));
            }
        }
        AiProvider::Anthropic => {
            options.anthropic_api_key = prompter.password("Anthropic API key")?;
        }
    }

    Ok(options)
}

fn read_new_password(prompter: &dyn Prompter) -> anyhow::Result<String> {
    for _ in 0..PASSWORD_ATTEMPTS {
        let password = prompter.password("Password")?;
        if password.is_empty() {
            println!("  {}", "Password cannot be empty".yellow());
            continue;
        }
        if prompter.password("Confirm password")? == password {
            return Ok(password);
        }
        println!("  {}", "Passwords do not match".yellow());
    }
    Err(anyhow::anyhow!("No password set"))
}

async fn resolve_ssh_source(
    prompter: &dyn Prompter,
    args: &DeployArgs,
) -> anyhow::Result<Option<String>> {
    if let Some(cidr) = &args.ssh_source {
        return Ok(Some(cidr.clone()));
    }
    if args.yes && !args.restrict_ssh {
        return Ok(None);
    }

    let ip = match utils::detect_public_ip().await {
        Ok(IpAddr::V4(ip)) => ip,
        Ok(IpAddr::V6(ip)) => {
            if args.restrict_ssh {
                return Err(anyhow::anyhow!(
                    "Public address {} is IPv6; pass --ssh-source with an IPv4 CIDR",
                    ip
                ));
            }
            return Ok(None);
        }
        Err(e) if args.restrict_ssh => {
            return Err(e.context("Could not detect the public IP for --restrict-ssh"));
        }
        Err(e) => {
            println!(
                "  ⚠ {}",
                format!("Could not detect your public IP, SSH stays open: {}", e).yellow()
            );
            return Ok(None);
        }
    };

    if args.restrict_ssh || prompter.confirm(&format!("Allow SSH only from {}?", ip), true)? {
        Ok(Some(format!("{}/32", ip)))
    } else {
        Ok(None)
    }
}

async fn check_dns(domain: &str, ip: &str, timings: &Timings) {
    println!("  Point an A record for {} at {}", domain.cyan(), ip.cyan());
    let pb = utils::spinner(&format!("Waiting for {} to resolve...", domain));
    let result = wait_for_dns(domain, ip, &timings.dns_poll).await;
    pb.finish_and_clear();
    match result {
        Ok(()) => println!("  ✓ {} resolves to {}", domain, ip),
        Err(e) => println!(
            "  ⚠ {}",
            format!("{}. HTTPS starts working once DNS propagates", e).yellow()
        ),
    }
}
