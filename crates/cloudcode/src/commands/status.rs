use crate::ssh::OpenSshConnector;
use crate::utils;
use cloudcode_cloud::{LifecyclePhase, ResourceSlot};
use cloudcode_config::Settings;
use cloudcode_deploy::{RemoteTarget, Timings, check_containers};
use colored::Colorize;

pub async fn handle(settings: &Settings) -> anyhow::Result<()> {
    let store = super::state_store(settings);
    let Some(state) = store.load_optional().await? else {
        println!("No deployment found. Run {} to create one.", "cloudcode deploy".bold());
        return Ok(());
    };

    println!("{}", "CloudCode deployment".blue().bold());
    println!("  Region:  {}", state.region.cyan());
    println!(
        "  Created: {}",
        state.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let phase = state.status.unwrap_or(LifecyclePhase::Running);
    let phase_label = match phase {
        LifecyclePhase::Running => phase.to_string().green(),
        LifecyclePhase::Suspended => phase.to_string().yellow(),
        LifecyclePhase::Destroyed => phase.to_string().red(),
    };
    println!("  Status:  {}", phase_label);

    println!();
    println!("{}", "Resources".bold());
    for slot in ResourceSlot::ALL {
        match state.resource_id(slot) {
            Some(id) => println!("  ✓ {:<15} {}", slot.label(), id.cyan()),
            None => println!("  - {:<15} {}", slot.label(), "not created".dimmed()),
        }
    }
    if !state.resources.eip.ip.is_empty() {
        println!("    {:<15} {}", "Public IP", state.resources.eip.ip);
    }

    if !state.cloudcode.domain.is_empty() && phase != LifecyclePhase::Destroyed {
        println!();
        println!("{}", "Application".bold());
        utils::print_app_urls(&state.cloudcode.domain, &state.cloudcode.username);
    }

    if phase != LifecyclePhase::Running {
        return Ok(());
    }
    let Some(target) = RemoteTarget::for_deployment(&state, &store) else {
        return Ok(());
    };

    let timings = Timings::default();
    let pb = utils::spinner("Checking containers...");
    let connector = OpenSshConnector;
    let result = check_containers(
        &connector,
        &target,
        &timings.ssh_backoff,
        timings.status_check_timeout,
    )
    .await;
    pb.finish_and_clear();

    println!();
    println!("{}", "Containers".bold());
    match result {
        Ok(components) if components.is_empty() => {
            println!("  ⚠ {}", "No containers are running".yellow());
        }
        Ok(components) => {
            for c in components {
                if c.is_running() {
                    println!("  ✓ {} {}", c.name.cyan(), c.state);
                } else {
                    println!("  ✗ {} {}", c.name.red(), c.state);
                }
            }
        }
        Err(e) => println!("  ⚠ {}", format!("Unreachable: {}", e).yellow()),
    }

    Ok(())
}
