//! Cappuccino - plan, run tools, answer

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    cache_get_command, history_command, init_command, run_command, status_command, tools_command,
};

/// Cappuccino - a task agent for your terminal
#[derive(Parser)]
#[command(name = "cappuccino")]
#[command(about = "◆ A planning, tool-using task agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config, workspace and state directories
    Init,
    /// Ask the agent something
    Run {
        /// Query to answer; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Show system status
    Status,
    /// List registered tools
    Tools,
    /// Show conversation history
    History {
        /// Number of most recent messages
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Inspect the result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print a cached value
    Get { key: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (label, result) = match cli.command {
        Commands::Init => ("Init", init_command().await),
        Commands::Run { message } => ("Run", run_command(message).await),
        Commands::Status => ("Status", status_command().await),
        Commands::Tools => ("Tools", tools_command().await),
        Commands::History { limit } => ("History", history_command(limit).await),
        Commands::Cache { command } => match command {
            CacheCommands::Get { key } => ("Cache get", cache_get_command(key).await),
        },
    };

    if let Err(e) = result {
        error!("{} failed: {:#}", label, e);
        eprintln!("◆ {} failed: {:#}", label, e);
        std::process::exit(1);
    }
}
