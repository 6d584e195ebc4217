use crate::prompt::StdinPrompter;
use crate::ssh::OpenSshConnector;
use crate::utils;
use cloudcode_config::Settings;
use cloudcode_deploy::{Lifecycle, ResumeOutcome, Timings};
use colored::Colorize;

pub async fn handle(settings: &Settings, yes: bool) -> anyhow::Result<()> {
    let provider = super::connect_provider(settings).await?;
    let store = super::state_store(settings);
    let lock = store.acquire_lock().await?;
    let timings = Timings::default();
    let prompter = StdinPrompter;
    let connector = OpenSshConnector;

    let lifecycle = Lifecycle::new(&provider, &store, &prompter, &connector, &timings);

    let pb = yes.then(|| utils::spinner("Starting instance..."));
    let result = lifecycle.resume(yes).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    lock.release().await?;

    match result? {
        ResumeOutcome::AlreadyRunning => {
            println!("{}", "Already running.".yellow());
        }
        ResumeOutcome::Cancelled => println!("Cancelled."),
        ResumeOutcome::Resumed { health } => {
            println!("{}", "✓ Instance running".green().bold());
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
                    format!("Containers not reachable yet: {}", e).yellow()
                ),
            }
            if let Ok(Some(state)) = store.load_optional().await {
                if !state.cloudcode.domain.is_empty() {
                    utils::print_app_urls(&state.cloudcode.domain, &state.cloudcode.username);
                }
            }
        }
    }
    Ok(())
}
