use clap::{Parser, Subcommand};
use std::path::PathBuf;
use conduit_cli::commands::{dead_letters, inspect, pending};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit operations CLI - offline inspection of pipeline data directories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the event log, its consumer groups, the dead-letter log and the record store.
    Inspect {
        /// Data directory of a node.
        #[arg(long, short)]
        dir: PathBuf,
    },
    /// List unacknowledged entries of a consumer group
    Pending {
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long, short, default_value = "conduit-workers")]
        group: String,
    },
    /// List dead-lettered entries
    DeadLetters {
        #[arg(long, short)]
        dir: PathBuf,

        /// Maximum number of entries to show
        #[arg(long, short, default_value_t = 100)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir } => inspect::run(&dir),
        Commands::Pending { dir, group } => pending::run(&dir, &group),
        Commands::DeadLetters { dir, limit } => dead_letters::run(&dir, limit),
    }
}
