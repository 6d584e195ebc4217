mod commands;
mod prompt;
mod ssh;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use cloudcode_config::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudcode")]
#[command(
    about = "Your own authenticated AI coding environment on Alibaba Cloud",
    long_about = None
)]
struct Cli {
    /// Directory holding state, keys and credentials (default: ~/.cloudcode)
    #[arg(long, global = true, env = "CLOUDCODE_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save Alibaba Cloud credentials
    Init,
    /// Create the cloud resources and install the application
    Deploy {
        /// Reinstall the application on an existing deployment
        #[arg(short, long)]
        force: bool,
        /// Custom domain (default: <ip>.nip.io)
        #[arg(long)]
        domain: Option<String>,
        /// Login username
        #[arg(long)]
        username: Option<String>,
        /// Contact email for TLS certificates
        #[arg(long)]
        email: Option<String>,
        /// AI provider
        #[arg(long, value_enum)]
        provider: Option<AiProvider>,
        /// API base URL for OpenAI-compatible providers
        #[arg(long)]
        base_url: Option<String>,
        /// Only allow SSH from this machine's public IP
        #[arg(long, conflicts_with = "ssh_source")]
        restrict_ssh: bool,
        /// Only allow SSH from this CIDR
        #[arg(long)]
        ssh_source: Option<String>,
        /// Accept defaults instead of asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the deployment and its containers
    Status,
    /// Stop the instance to save compute costs
    Suspend {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Start a suspended instance
    Resume {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every cloud resource
    Destroy {
        /// Skip all confirmations
        #[arg(short, long)]
        force: bool,
        /// Show what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Snapshot the disk first so a later deploy can restore it
        #[arg(long, conflicts_with = "no_backup")]
        keep_backup: bool,
        /// Do not snapshot the disk
        #[arg(long)]
        no_backup: bool,
    },
    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AiProvider {
    Openai,
    Anthropic,
    /// Any OpenAI-compatible endpoint
    Custom,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("cloudcode {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load(cli.state_dir)?;
    tracing::debug!("State directory: {}", settings.state_dir.display());

    // Dropping the command future releases the state lock
    tokio::select! {
        result = run(cli.command, &settings) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            Err(anyhow::anyhow!(
                "Interrupted. Run the same command again to pick up where it stopped"
            ))
        }
    }
}

async fn run(command: Commands, settings: &Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init => commands::init::handle(settings).await,
        Commands::Deploy {
            force,
            domain,
            username,
            email,
            provider,
            base_url,
            restrict_ssh,
            ssh_source,
            yes,
        } => {
            let args = commands::deploy::DeployArgs {
                force,
                domain,
                username,
                email,
                provider,
                base_url,
                restrict_ssh,
                ssh_source,
                yes,
            };
            commands::deploy::handle(settings, args).await
        }
        Commands::Status => commands::status::handle(settings).await,
        Commands::Suspend { yes } => commands::suspend::handle(settings, yes).await,
        Commands::Resume { yes } => commands::resume::handle(settings, yes).await,
        Commands::Destroy {
            force,
            dry_run,
            keep_backup,
            no_backup,
        } => {
            let keep_backup = match (keep_backup, no_backup) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::destroy::handle(settings, force, dry_run, keep_backup).await
        }
        Commands::Version => {
            unreachable!("Version is handled before settings are loaded");
        }
    }
}
