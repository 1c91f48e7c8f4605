//! Configuration management for onion-embed.
//!
//! This module provides configuration parsing from TOML files, environment
//! variables and command-line arguments. Configuration is applied in order:
//! defaults → config file → command-line arguments, with later sources
//! overriding earlier ones.
//!
//! # Configuration Flow
//!
//! ```text
//!     ┌─────────────────┐
//!     │ Config::default │ ◄── Start with sensible defaults
//!     └────────┬────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐     ┌────────────────────┐
//!     │ Config file     │ ◄───│ --config or        │  (TOML format)
//!     │ exists?         │     │ ONION_EMBED_CONFIG │
//!     └────────┬────────┘     └────────────────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐     ┌─────────────────┐
//!     │ Apply CLI args  │ ◄───│ --loglevel,     │  (CLI host only)
//!     │ (override)      │     │ --listen-address│
//!     └────────┬────────┘     └─────────────────┘
//!              │
//!              ▼
//!     ┌─────────────────┐
//!     │ Validate        │
//!     └─────────────────┘
//! ```
//!
//! Hosts that load the library through the C ABI cannot pass arguments, so the
//! process-wide controller reads [`CONFIG_ENV_VAR`] (if set) and falls back to
//! defaults otherwise. See [`Config::from_env`].
//!
//! # Example Configuration File
//!
//! ```toml
//! # Logging for the library itself
//! loglevel = "info"              # debug, info, notice, warn, error
//! # logfile = "/var/log/onion-embed.log"
//! # logfile = ":syslog:"
//!
//! # Minimum level of engine records forwarded to the host log callback
//! engine_loglevel = "info"
//!
//! # Log bridge queue; records beyond this are dropped, never blocking the engine
//! log_queue_capacity = 1024
//!
//! # SOCKS listener address (port is chosen by the host)
//! listen_address = "127.0.0.1"
//!
//! # Engine runtime
//! # runtime_worker_threads = 2
//! shutdown_grace_ms = 1000
//! ```
//!
//! # What This Module Does NOT Do
//!
//! - **Runtime reconfiguration**: config is read when the controller is created
//! - **Engine tuning**: Arti's own configuration is derived from the data directory
//!
//! # See Also
//!
//! - [`LogLevel`] for logging configuration
//! - [`CliArgs`] for the CLI host's arguments

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming a TOML configuration file.
pub const CONFIG_ENV_VAR: &str = "ONION_EMBED_CONFIG";

/// Log level for onion-embed output and bridged records.
///
/// From most to least verbose:
/// [`Debug`](LogLevel::Debug) > [`Info`](LogLevel::Info) > [`Notice`](LogLevel::Notice) >
/// [`Warn`](LogLevel::Warn) > [`Error`](LogLevel::Error)
///
/// # Example
///
/// ```rust
/// use onion_embed::LogLevel;
///
/// let level = LogLevel::Notice;
/// assert!(level < LogLevel::Warn);
/// assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Low-level debugging information.
    Debug,
    /// Informational messages about normal operation.
    #[default]
    Info,
    /// Notable events, such as lifecycle transitions.
    Notice,
    /// Warning conditions that don't prevent operation.
    Warn,
    /// Error conditions.
    Error,
}

impl LogLevel {
    /// Returns the matching `tracing` level filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Notice => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERR" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!("invalid log level: {}", s))),
        }
    }
}

/// Main configuration struct for onion-embed.
///
/// # Fields
///
/// | Field | Type | Default | Description |
/// |-------|------|---------|-------------|
/// | `loglevel` | `LogLevel` | `Info` | Verbosity of the library's own log output |
/// | `logfile` | `Option<String>` | `None` | stderr when unset, a path, or `:syslog:` |
/// | `engine_loglevel` | `LogLevel` | `Info` | Minimum engine record level forwarded to the host |
/// | `log_queue_capacity` | `usize` | `1024` | Bounded log bridge queue size |
/// | `listen_address` | `String` | `"127.0.0.1"` | Address the SOCKS listener binds |
/// | `runtime_worker_threads` | `Option<usize>` | `None` | Engine runtime workers (tokio default when unset) |
/// | `shutdown_grace_ms` | `u64` | `1000` | Bound on engine runtime shutdown |
///
/// # Example
///
/// ```rust
/// use onion_embed::{Config, LogLevel};
///
/// let mut config = Config::default();
/// config.loglevel = LogLevel::Debug;
/// config.listen_address = "::1".to_string();
/// config.validate().expect("valid configuration");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Log level for the library's own output.
    #[serde(default)]
    pub loglevel: LogLevel,
    /// Log file path. None for stderr, ":syslog:" for syslog.
    #[serde(default)]
    pub logfile: Option<String>,
    /// Minimum level of engine records forwarded to the host log callback.
    #[serde(default)]
    pub engine_loglevel: LogLevel,
    /// Capacity of the log bridge queue.
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,
    /// Address the SOCKS listener binds to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Worker threads for the engine runtime. None uses the tokio default.
    #[serde(default)]
    pub runtime_worker_threads: Option<usize>,
    /// Upper bound, in milliseconds, on engine runtime shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_log_queue_capacity() -> usize {
    1024
}
fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            logfile: None,
            engine_loglevel: LogLevel::default(),
            log_queue_capacity: default_log_queue_capacity(),
            listen_address: default_listen_address(),
            runtime_worker_threads: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    /// Returns [`Error::Config`] if the TOML is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration for the ABI singleton.
    ///
    /// Reads the file named by [`CONFIG_ENV_VAR`] when the variable is set;
    /// otherwise returns defaults. The result is validated.
    pub fn from_env() -> Result<Self> {
        let config = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.log_queue_capacity == 0 {
            return Err(Error::Config(
                "log_queue_capacity must be positive".to_string(),
            ));
        }
        if self.listen_address.parse::<IpAddr>().is_err() {
            return Err(Error::Config(format!(
                "listen_address is not an IP address: {}",
                self.listen_address
            )));
        }
        if self.runtime_worker_threads == Some(0) {
            return Err(Error::Config(
                "runtime_worker_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the parsed listen address.
    ///
    /// Falls back to the IPv4 loopback address if the configured value does not
    /// parse; [`validate`](Config::validate) rejects such configurations.
    pub fn listen_ip(&self) -> IpAddr {
        self.listen_address
            .parse()
            .unwrap_or(IpAddr::from([127, 0, 0, 1]))
    }
}

/// Command-line arguments for the `onion-embed` host binary.
///
/// # Options
///
/// | Option | Description |
/// |--------|-------------|
/// | `--data-dir <DIR>` | Absolute data directory for the engine |
/// | `--port <PORT>` | SOCKS port (default: 9050) |
/// | `--config <FILE>` | TOML configuration [env: ONION_EMBED_CONFIG] |
/// | `--generate_config <FILE>` | Write default config to file and exit |
/// | `--loglevel <LEVEL>` | DEBUG, INFO, NOTICE, WARN, ERROR |
/// | `--logfile <FILE>` | Log to file instead of stderr (":syslog:" for syslog) |
/// | `--listen-address <IP>` | SOCKS listen address |
#[derive(Parser, Debug)]
#[command(name = "onion-embed")]
#[command(about = "Run an embedded Arti client as a local SOCKS proxy")]
#[command(version)]
pub struct CliArgs {
    /// Data directory for engine state and cache.
    ///
    /// Must be an absolute path. Created if missing.
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// SOCKS port to listen on.
    #[arg(long, default_value_t = 9050)]
    pub port: i32,

    /// Path to configuration file.
    #[arg(long = "config", env = "ONION_EMBED_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Write default config to file and exit.
    #[arg(long = "generate_config")]
    pub generate_config: Option<PathBuf>,

    /// Log verbosity (DEBUG, INFO, NOTICE, WARN, ERROR).
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Log to file instead of stderr (use ":syslog:" for syslog).
    #[arg(long)]
    pub logfile: Option<String>,

    /// Address the SOCKS listener binds to.
    #[arg(long)]
    pub listen_address: Option<String>,
}

impl CliArgs {
    /// Apply CLI arguments to a configuration, overriding values.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(ref loglevel) = self.loglevel {
            config.loglevel = loglevel.parse()?;
        }
        if let Some(ref logfile) = self.logfile {
            config.logfile = Some(logfile.clone());
        }
        if let Some(ref listen_address) = self.listen_address {
            config.listen_address = listen_address.clone();
        }
        Ok(())
    }
}

/// Load configuration from file and CLI arguments.
///
/// 1. Start with defaults
/// 2. Apply config file if given
/// 3. Apply CLI arguments (override)
///
/// # Errors
///
/// Returns [`Error::Config`] if configuration is invalid, [`Error::Io`] if a
/// given config file cannot be read.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = match args.config_file {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };

    args.apply_to(&mut config)?;
    config.validate()?;

    Ok(config)
}
