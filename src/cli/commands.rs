//! CLI command implementations
//!
//! Boot sequence for `start`:
//! 1. Configuration load and validation
//! 2. Logging
//! 3. Store open and schema migration
//! 4. Component wiring
//! 5. Serve until Ctrl-C

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::config::AppConfig;
use crate::http_server::{AppState, HttpServer};
use crate::observability::{init_logging, Event};
use crate::store::SqliteStore;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Start { config, port } => start(&config, port),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Create the database file and apply the schema
///
/// Safe to repeat: migrations only create what is missing.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = AppConfig::load(config_path)?;
    open_store(&config)?;

    println!(
        "{}",
        json!({
            "initialized": true,
            "database": config.database.path.to_string_lossy(),
        })
    );
    Ok(())
}

/// Boot and serve until interrupted
pub fn start(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = AppConfig::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }

    init_logging(&config.logging);
    info!(event = %Event::BootStart, version = env!("CARGO_PKG_VERSION"), "Booting");
    info!(
        event = %Event::ConfigLoaded,
        path = %config_path.display(),
        addr = %config.server.bind_addr(),
        "Configuration loaded"
    );

    let store = Arc::new(open_store(&config)?);
    let state = Arc::new(AppState::new(&config, store));
    let server = HttpServer::new(config.server.clone(), state);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Validate and print the configuration with secrets masked
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = AppConfig::load(config_path)?;
    println!("{}", redacted_json(&config)?);
    Ok(())
}

fn redacted_json(config: &AppConfig) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(&config.redacted())?)
}

fn open_store(config: &AppConfig) -> CliResult<SqliteStore> {
    let store = SqliteStore::open(&config.database.path, config.database.pool_size)?;
    info!(
        event = %Event::StoreReady,
        path = %config.database.path.display(),
        pool_size = config.database.pool_size,
        "Store ready"
    );
    Ok(store)
}
