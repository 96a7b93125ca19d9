//! CLI argument definitions using clap
//!
//! Commands:
//! - quickconsult init --config <path>
//! - quickconsult start --config <path>
//! - quickconsult check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// QuickConsult - realtime client/expert consultations
#[derive(Parser, Debug)]
#[command(name = "quickconsult")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database and apply the schema
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./quickconsult.json")]
        config: PathBuf,
    },

    /// Start the HTTP and WebSocket server
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./quickconsult.json")]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate configuration and print it with secrets masked
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./quickconsult.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
