//! `broadcast-server`: WebSocket broadcast relay and its interactive client.
//!
//! Every text message a connected peer sends is relayed to every connected
//! peer as `"[<peer-address>]: <message>"`.
//!
//! # Usage
//!
//! ```bash
//! # Start the server on 0.0.0.0:3000
//! cargo run --bin broadcast-server -- server
//!
//! # Connect a client to ws://localhost:3000/ws and type messages; `exit` quits
//! cargo run --bin broadcast-server -- client
//!
//! # Custom endpoints, also settable via BROADCAST_ADDR / BROADCAST_URL
//! cargo run --bin broadcast-server -- server --bind 127.0.0.1:8080
//! cargo run --bin broadcast-server -- client --url ws://127.0.0.1:8080/ws
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use broadcast_cli::client::RelayClient;
use broadcast_cli::config::{Cli, ClientConfig, ModeConfig};
use broadcast_cli::interactive::{self, InteractiveEnd};
use broadcast_relay::config::RelayConfig;
use broadcast_relay::relay::{self, RelayState};
use clap::Parser;
use clap::error::ErrorKind;
use tokio::io::BufReader;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = parse_cli();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match cli.load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match config {
        ModeConfig::Server(config) => {
            init_logging(&cli.log_level);
            run_server(config).await
        }
        ModeConfig::Client(config) => {
            let _log_guard = init_client_logging(&cli.log_level, config.log_file.as_deref());
            run_client(config).await
        }
    }
}

/// Parse the command line, exiting with status 1 on a missing or invalid mode.
///
/// `--help` and `--version` still exit with status 0.
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

/// Initialize stdout logging for server mode.
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Initialize logging for client mode.
///
/// Stdout carries relayed messages, so logs go to stderr, or to `file_path`
/// when it names a file. Returns a [`WorkerGuard`] that must be held until
/// shutdown so buffered file entries are flushed.
fn init_client_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(split_log_path) else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        if let Some(path) = file_path {
            tracing::warn!(path = %path.display(), "log file path has no file name, logging to stderr");
        }
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Split a log file path into the directory to create it in and its name.
fn split_log_path(path: &Path) -> Option<(&Path, &str)> {
    let file_name = path.file_name()?.to_str()?;
    let log_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some((log_dir, file_name))
}

/// Bind, accept until the server task dies or ctrl-c arrives.
async fn run_server(config: RelayConfig) -> ExitCode {
    tracing::info!(addr = %config.bind_addr, "starting broadcast relay server");

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(RelayState::with_config(config));

    let (bound_addr, mut handle) =
        match relay::start_server_with_state(&bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                return ExitCode::FAILURE;
            }
        };
    tracing::info!(addr = %bound_addr, "ws server listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
            ExitCode::FAILURE
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
            state.close_all_connections().await;
            handle.abort();
            ExitCode::SUCCESS
        }
    }
}

/// Dial the server and run the interactive loop on stdin/stdout.
async fn run_client(config: ClientConfig) -> ExitCode {
    let client = match RelayClient::connect(&config.server_url, config.connect_timeout).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to server");
            return ExitCode::FAILURE;
        }
    };

    let (mut sender, mut receiver) = client.into_split();
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    let result = interactive::run_interactive(&mut sender, &mut receiver, stdin, stdout).await;
    sender.close().await;

    match result {
        Ok(InteractiveEnd::ExitCommand | InteractiveEnd::InputClosed) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "client failed");
            ExitCode::FAILURE
        }
    }
}
