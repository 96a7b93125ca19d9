//! CLI module for QuickConsult
//!
//! Provides command-line interface for:
//! - init: Create the database
//! - start: Boot and serve HTTP/WebSocket
//! - check-config: Validate and print configuration

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check_config, init, run, run_command, start};
pub use errors::{CliError, CliErrorCode, CliResult};
