//! Configuration module for diam-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// What the process does once configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Send a single CCR and wait for the CCA
    Client,
    /// Benchmark the peer with ACRs over many connections
    Bench,
    /// Answer requests as a Diameter peer
    Serve,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "diam-bench")]
#[command(author = "diam-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "A Diameter load generator and answering peer", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Operating mode
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Peer address to connect to (e.g., localhost:3868)
    #[arg(short, long)]
    pub addr: Option<String>,

    /// Address to bind to in serve mode (e.g., 0.0.0.0:3868)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Diameter identity host (Origin-Host)
    #[arg(long)]
    pub diam_host: Option<String>,

    /// Diameter identity realm (Origin-Realm)
    #[arg(long)]
    pub diam_realm: Option<String>,

    /// Number of client connections in bench mode
    #[arg(long)]
    pub bench_clients: Option<usize>,

    /// Number of ACR messages per connection in bench mode
    #[arg(long)]
    pub bench_msgs: Option<usize>,

    /// Maximum wait for each completion in bench mode, in milliseconds
    #[arg(long)]
    pub signal_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub bench: BenchConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where to connect and where to listen
#[derive(Debug, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            listen: default_listen(),
        }
    }
}

/// Local Diameter identity
#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u32,
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default = "default_host_ip")]
    pub host_ip: IpAddr,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            realm: default_realm(),
            vendor_id: default_vendor_id(),
            product_name: default_product_name(),
            host_ip: default_host_ip(),
        }
    }
}

/// Benchmark settings
#[derive(Debug, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_messages")]
    pub messages: usize,
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            messages: default_messages(),
            signal_timeout_ms: default_signal_timeout_ms(),
        }
    }
}

/// Single-exchange and handshake settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_answer_timeout_ms")]
    pub answer_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_user_name")]
    pub user_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            answer_timeout_ms: default_answer_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            user_name: default_user_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_addr() -> String {
    "localhost:3868".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:3868".to_string()
}

fn default_host() -> String {
    "client".to_string()
}

fn default_realm() -> String {
    "diam-bench".to_string()
}

fn default_vendor_id() -> u32 {
    13
}

fn default_product_name() -> String {
    "diam-bench".to_string()
}

fn default_host_ip() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_clients() -> usize {
    1
}

fn default_messages() -> usize {
    1000
}

fn default_signal_timeout_ms() -> u64 {
    1000
}

fn default_answer_timeout_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_user_name() -> String {
    "foobar".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub addr: String,
    pub listen: String,
    pub host: String,
    pub realm: String,
    pub vendor_id: u32,
    pub product_name: String,
    pub host_ip: IpAddr,
    pub bench_clients: usize,
    pub bench_msgs: usize,
    pub signal_timeout: Duration,
    pub answer_timeout: Duration,
    pub handshake_timeout: Duration,
    pub user_name: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            mode: cli.mode.or(toml_config.mode).unwrap_or(Mode::Client),
            addr: cli.addr.unwrap_or(toml_config.peer.addr),
            listen: cli.listen.unwrap_or(toml_config.peer.listen),
            host: cli.diam_host.unwrap_or(toml_config.identity.host),
            realm: cli.diam_realm.unwrap_or(toml_config.identity.realm),
            vendor_id: toml_config.identity.vendor_id,
            product_name: toml_config.identity.product_name,
            host_ip: toml_config.identity.host_ip,
            bench_clients: cli.bench_clients.unwrap_or(toml_config.bench.clients),
            bench_msgs: cli.bench_msgs.unwrap_or(toml_config.bench.messages),
            signal_timeout: Duration::from_millis(
                cli.signal_timeout_ms
                    .unwrap_or(toml_config.bench.signal_timeout_ms),
            ),
            answer_timeout: Duration::from_millis(toml_config.client.answer_timeout_ms),
            handshake_timeout: Duration::from_millis(toml_config.client.handshake_timeout_ms),
            user_name: toml_config.client.user_name,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("diameter host must not be empty"));
        }
        if self.realm.is_empty() {
            return Err(ConfigError::Invalid("diameter realm must not be empty"));
        }
        if u32::try_from(self.bench_msgs).is_err() {
            return Err(ConfigError::Invalid("bench messages must fit in an Unsigned32"));
        }
        match self.bench_clients.checked_mul(self.bench_msgs) {
            Some(total) if total <= tokio::sync::Semaphore::MAX_PERMITS => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "bench clients times messages exceeds the completion queue limit",
                ))
            }
        }
        if self.signal_timeout.is_zero() {
            return Err(ConfigError::Invalid("signal timeout must be positive"));
        }
        if self.answer_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid("client timeouts must be positive"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
