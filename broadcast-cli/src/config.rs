//! Configuration system for the `broadcast-server` binary.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/broadcast-server/config.toml`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use broadcast_proto::default_server_url;
use broadcast_relay::config::RelayConfig;

/// Default timeout for dialing the relay server.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The server URL is not a valid URL.
    #[error("invalid server url {url}: {source}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// The server URL does not use `ws` or `wss`.
    #[error("unsupported url scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The log file path does not name a file.
    #[error("log file path {0} does not name a file")]
    InvalidLogFile(PathBuf),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    client: ClientFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    send_timeout_ms: Option<u64>,
    max_message_size: Option<usize>,
    max_read_errors: Option<u32>,
}

/// `[client]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientFileConfig {
    server_url: Option<String>,
    connect_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug)]
#[command(name = "broadcast-server", version, about = "WebSocket broadcast relay")]
pub struct Cli {
    /// Process mode.
    #[command(subcommand)]
    pub mode: Mode,

    /// Path to config file (default: `~/.config/broadcast-server/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BROADCAST_LOG", global = true)]
    pub log_level: String,
}

/// Process modes.
#[derive(clap::Subcommand, Debug)]
pub enum Mode {
    /// Start the server.
    Server(ServerArgs),
    /// Connect to a running server as a client.
    Client(ClientArgs),
}

/// Flags for `server` mode.
#[derive(clap::Args, Debug, Default)]
pub struct ServerArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "BROADCAST_ADDR")]
    pub bind: Option<String>,

    /// Give up on a write to one peer after this many milliseconds.
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Largest inbound message accepted from a peer, in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Consecutive read errors tolerated before a peer is dropped.
    #[arg(long)]
    pub max_read_errors: Option<u32>,
}

/// Flags for `client` mode.
#[derive(clap::Args, Debug, Default)]
pub struct ClientArgs {
    /// WebSocket URL of the server.
    #[arg(short, long, env = "BROADCAST_URL")]
    pub url: Option<String>,

    /// Give up dialing after this many milliseconds.
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the server.
    pub server_url: String,
    /// Timeout for dialing the server.
    pub connect_timeout: Duration,
    /// Optional log file; logs go to stderr when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            log_file: None,
        }
    }
}

/// Resolved configuration for the selected mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeConfig {
    /// Run the relay server.
    Server(RelayConfig),
    /// Run the interactive client.
    Client(ClientConfig),
}

impl Cli {
    /// Load configuration for the selected mode by merging CLI args, env
    /// vars and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if the client's server URL is invalid.
    pub fn load(&self) -> Result<ModeConfig, ConfigError> {
        let file = load_config_file(self.config.as_deref())?;
        match &self.mode {
            Mode::Server(args) => Ok(ModeConfig::Server(resolve_server(args, &file.server))),
            Mode::Client(args) => resolve_client(args, &file.client).map(ModeConfig::Client),
        }
    }
}

/// Resolve a [`RelayConfig`]. Priority: CLI > file > default.
fn resolve_server(cli: &ServerArgs, file: &ServerFileConfig) -> RelayConfig {
    let defaults = RelayConfig::default();

    RelayConfig {
        bind_addr: cli
            .bind
            .clone()
            .or_else(|| file.bind_addr.clone())
            .unwrap_or(defaults.bind_addr),
        send_timeout: cli
            .send_timeout_ms
            .or(file.send_timeout_ms)
            .map_or(defaults.send_timeout, Duration::from_millis),
        max_message_size: cli
            .max_message_size
            .or(file.max_message_size)
            .unwrap_or(defaults.max_message_size),
        max_read_errors: cli
            .max_read_errors
            .or(file.max_read_errors)
            .unwrap_or(defaults.max_read_errors),
    }
}

/// Resolve a [`ClientConfig`]. Priority: CLI > file > default.
fn resolve_client(cli: &ClientArgs, file: &ClientFileConfig) -> Result<ClientConfig, ConfigError> {
    let defaults = ClientConfig::default();

    let server_url = cli
        .url
        .clone()
        .or_else(|| file.server_url.clone())
        .unwrap_or(defaults.server_url);

    Ok(ClientConfig {
        server_url: validate_server_url(&server_url)?,
        connect_timeout: cli
            .connect_timeout_ms
            .or(file.connect_timeout_ms)
            .map_or(defaults.connect_timeout, Duration::from_millis),
        log_file: cli.log_file.as_deref().map(validate_log_file).transpose()?,
    })
}

/// Checks that `path` ends in a UTF-8 file name the appender can open.
fn validate_log_file(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(_) => Ok(path.to_path_buf()),
        None => Err(ConfigError::InvalidLogFile(path.to_path_buf())),
    }
}

/// Checks that `raw` is a `ws://` or `wss://` URL.
fn validate_server_url(raw: &str) -> Result<String, ConfigError> {
    let url = url::Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(raw.to_string()),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("broadcast-server").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
