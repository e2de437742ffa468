use std::path::PathBuf;

use clap::{Parser, Subcommand};

use vaultbridge::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "vaultbridge")]
#[command(about = "Wedding-planner tools over a stdio MCP database worker", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// JSON config file. Missing means defaults plus environment.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub(crate) config: PathBuf,

    /// Debug logging (overridden by VAULTBRIDGE_LOG / RUST_LOG).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Serve the tools over MCP on stdin/stdout.
    Serve {
        /// Session used when a call carries no session_id.
        #[arg(long, default_value = "default")]
        session: String,
    },

    /// Run one tool and print its envelope.
    Call {
        tool: String,
        #[arg(long, default_value = "cli")]
        session: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Print the tool definitions.
    Tools,

    /// Start the worker and probe the vector backend.
    Check,
}
