use crate::prompt::StdinPrompter;
use crate::ssh::OpenSshConnector;
use crate::utils;
use cloudcode_config::Settings;
use cloudcode_deploy::{Lifecycle, SuspendOutcome, Timings};
use colored::Colorize;

pub async fn handle(settings: &Settings, yes: bool) -> anyhow::Result<()> {
    let provider = super::connect_provider(settings).await?;
    let store = super::state_store(settings);
    let lock = store.acquire_lock().await?;
    let timings = Timings::default();
    let prompter = StdinPrompter;
    let connector = OpenSshConnector;

    let lifecycle = Lifecycle::new(&provider, &store, &prompter, &connector, &timings);

    let pb = yes.then(|| utils::spinner("Stopping instance..."));
    let result = lifecycle.suspend(yes).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    lock.release().await?;

    match result? {
        SuspendOutcome::AlreadySuspended => {
            println!("{}", "Already suspended.".yellow());
        }
        SuspendOutcome::Cancelled => println!("Cancelled."),
        SuspendOutcome::Suspended => {
            println!("{}", "✓ Instance stopped".green().bold());
            println!("  Compute billing is paused. Disk and EIP are still charged.");
            println!("  Run {} to start it again.", "cloudcode resume".bold());
        }
    }
    Ok(())
}
