use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "tend")]
#[command(version, about = "Autonomous codebase-improvement daemon")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .tend state directory
    Init,
    /// Run improvement cycles over queued objectives
    Run {
        /// Objective to enqueue before the run starts (repeatable)
        #[arg(short, long = "objective")]
        objectives: Vec<String>,
        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u64>,
        /// Keep generating objectives after the queue drains
        #[arg(long)]
        continuous: bool,
    },
    /// Show memory and cycle-log summary
    Status,
    /// Print recent cycle-log rows
    Log {
        /// Number of rows to show
        #[arg(long, default_value_t = 20)]
        count: usize,
    },
    /// Clear cycle log, memory, and learning stats
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir, cli.verbose),
        Commands::Run {
            objectives,
            max_cycles,
            continuous,
        } => {
            cmd::run_cycles(
                &cli,
                project_dir,
                objectives.clone(),
                *max_cycles,
                *continuous,
            )
            .await
        }
        Commands::Status => cmd::cmd_status(&project_dir),
        Commands::Log { count } => cmd::cmd_log(&project_dir, *count),
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force),
    }
}
