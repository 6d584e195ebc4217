use crate::prompt::StdinPrompter;
use crate::utils;
use cloudcode_config::Settings;
use cloudcode_deploy::{
    DeployError, DestroyOptions, DestroyOutcome, DestroyPlan, Destroyer, Timings,
};
use colored::Colorize;

pub async fn handle(
    settings: &Settings,
    force: bool,
    dry_run: bool,
    keep_backup: Option<bool>,
) -> anyhow::Result<()> {
    let store = super::state_store(settings);

    let plan = store
        .load_optional()
        .await?
        .map(|state| DestroyPlan::from_state(&state))
        .filter(|plan| !plan.is_empty());
    let Some(plan) = plan else {
        println!("Nothing to destroy.");
        return Ok(());
    };

    println!("{}", "The following resources will be deleted:".bold());
    print_plan(&plan);

    if dry_run {
        println!();
        println!("{}", "Dry run: nothing was deleted.".yellow());
        return Ok(());
    }

    println!();
    let provider = super::connect_provider(settings).await?;
    let lock = store.acquire_lock().await?;
    let timings = Timings::default();
    let prompter = StdinPrompter;

    let options = DestroyOptions {
        force,
        dry_run,
        keep_backup,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let destroyer = Destroyer::new(&provider, &store, &prompter, &timings);

    let pb = force.then(|| utils::spinner("Destroying resources..."));
    let result = destroyer.run(&options).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    lock.release().await?;

    match result {
        Ok(DestroyOutcome::NothingToDo) => println!("Nothing to destroy."),
        Ok(DestroyOutcome::DryRun(_)) => {}
        Ok(DestroyOutcome::Cancelled) => println!("Cancelled."),
        Ok(DestroyOutcome::Completed { report, backup }) => {
            for (slot, id) in &report.deleted {
                println!("  ✓ {} {} deleted", slot, id.cyan());
            }
            println!();
            println!("{}", "✓ All resources deleted".green().bold());
            if let Some(backup) = backup {
                println!(
                    "  Backup snapshot {} kept. The next {} offers to restore it.",
                    backup.snapshot_id.cyan(),
                    "cloudcode deploy".bold()
                );
            }
        }
        Err(DeployError::TeardownIncomplete { failed }) => {
            for line in &failed {
                println!("  ✗ {}", line.red());
            }
            println!();
            println!(
                "Run {} again, or delete the remaining resources in the Alibaba Cloud console.",
                "cloudcode destroy".bold()
            );
            return Err(DeployError::TeardownIncomplete { failed }.into());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_plan(plan: &DestroyPlan) {
    for (slot, id) in &plan.resources {
        println!("  - {:<15} {}", slot.label(), id);
    }
}
