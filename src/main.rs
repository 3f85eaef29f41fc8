use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod backend;
mod cli;
mod core;
mod daemon;

#[derive(Parser)]
#[command(name = "distro-sync")]
#[command(author, version, about = "Background synchronization daemon for WSL distribution state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the polling daemon
    Daemon,

    /// Fetch and show current distribution state once
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Only fetch one resource (distros, resource-usage, health)
        #[arg(long)]
        resource: Option<String>,
    },

    /// Trigger an immediate daemon refresh via D-Bus
    Refresh,

    /// Suspend or release polling around an exclusive operation
    Exclusion {
        #[command(subcommand)]
        action: ExclusionAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ExclusionAction {
    /// Start an exclusion, e.g. `compacting:Ubuntu`
    Begin { reason: String },

    /// End a previously started exclusion
    End { reason: String },
}

fn init_logging(debug: bool, journald: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let journald_layer = if journald {
        tracing_journald::layer().ok()
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(journald_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => {
            let debug = crate::core::settings::Settings::load()
                .map(|s| s.debug)
                .unwrap_or(false);
            init_logging(debug, true);
            daemon::run().await
        }
        Commands::Status { json, resource } => {
            init_logging(false, false);
            cli::status::run(json, resource).await
        }
        Commands::Refresh => {
            init_logging(false, false);
            cli::control::refresh().await
        }
        Commands::Exclusion { action } => {
            init_logging(false, false);
            match action {
                ExclusionAction::Begin { reason } => cli::control::begin_exclusion(reason).await,
                ExclusionAction::End { reason } => cli::control::end_exclusion(reason).await,
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
