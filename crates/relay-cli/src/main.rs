//! `orchestrator` — operator CLI for the relay runtime.
//!
//! # Commands
//!
//! - `orchestrator query <instance> <prompt>` — run one agent turn
//! - `orchestrator sessions list|show|tree|export|watch|cleanup` — inspect
//!   and manage session history

mod helpers;
mod query_cmd;
mod sessions_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// relay — multi-agent orchestration runtime operator CLI
#[derive(Parser)]
#[command(name = "orchestrator", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent turn against an instance and print its result
    Query {
        /// Instance name (directory under the instances root)
        instance: String,
        /// The prompt to send
        prompt: String,
        /// Resume an existing session instead of starting a new one
        #[arg(long)]
        resume: Option<String>,
        /// Record this turn as a child of the given parent session
        #[arg(long)]
        parent: Option<String>,
    },

    /// Inspect and manage session history
    Sessions {
        #[command(subcommand)]
        action: sessions_cmd::SessionsCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    helpers::init_logging(cli.logs);

    match cli.command {
        Commands::Query { instance, prompt, resume, parent } => {
            query_cmd::run(&instance, &prompt, resume, parent).await
        }
        Commands::Sessions { action } => sessions_cmd::dispatch(action).await,
    }
}
