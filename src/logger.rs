//! Logging infrastructure for onion-embed.
//!
//! This module provides logging functionality using the tracing ecosystem.
//! It supports output to stderr, files, and syslog, with configurable log levels,
//! and forwards the engine's own `tracing` events to the host through the
//! [`LogBridge`].
//!
//! # Overview
//!
//! The logging system provides:
//!
//! - **Multiple output destinations**: stderr, file, or syslog
//! - **Configurable log levels**: From DEBUG to ERROR
//! - **Engine forwarding**: events from `arti*` and `tor_*` targets reach the host callback
//! - **Environment variable override**: `RUST_LOG` can override the configured level
//!
//! # Layers
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!   tracing event ──────▶│ Registry                     │
//!                        │  ├── fmt layer  (EnvFilter)  │──▶ stderr / file / syslog
//!                        │  └── ForwardLayer            │──▶ LogBridge ──▶ host sink
//!                        │      (engine targets,        │
//!                        │       engine_loglevel)       │
//!                        └──────────────────────────────┘
//! ```
//!
//! Each layer carries its own filter, so the host can receive engine debug
//! records while the local output stays at `loglevel`.
//!
//! # Log Levels
//!
//! | Level | tracing | Use Case |
//! |-------|---------|----------|
//! | [`Debug`](crate::LogLevel::Debug) | `debug!` / `trace!` | Development only |
//! | [`Info`](crate::LogLevel::Info) | `info!` | Default level |
//! | [`Notice`](crate::LogLevel::Notice) | `info!` | Lifecycle transitions |
//! | [`Warn`](crate::LogLevel::Warn) | `warn!` | Potential issues |
//! | [`Error`](crate::LogLevel::Error) | `error!` | Failures |
//!
//! # Example
//!
//! ```rust,no_run
//! use onion_embed::{Config, LogLevel, logger};
//!
//! // Initialize logging to stderr at the configured level
//! logger::init(&Config::default(), None).unwrap();
//!
//! logger::plog(LogLevel::Notice, "Engine started");
//! logger::plog(LogLevel::Warn, "Bootstrap is slow");
//! ```
//!
//! # What This Module Does NOT Do
//!
//! - **Log rotation**: Use external tools like logrotate
//! - **Record delivery**: The host callback is driven by [`crate::bridge`]
//!
//! # See Also
//!
//! - [`crate::config::LogLevel`] - Log level enumeration
//! - [`crate::bridge`] - Host log delivery
//! - [tracing crate](https://docs.rs/tracing) - Underlying logging framework

use std::fmt;
use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::field::{Field, Visit};
use tracing::{debug, error, info, warn, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::bridge::{LogBridge, LogEmitter, LogRecord};
use crate::config::{Config, LogLevel};
use crate::error::{Error, Result};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Initialize the logging system.
///
/// Installs the process-wide tracing subscriber. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `config` - Supplies `loglevel`, `logfile` and `engine_loglevel`. `logfile` is:
///   - `None` - Log to stderr with ANSI colors
///   - `Some(":syslog:")` - Log to system syslog
///   - `Some(path)` - Log to file at the specified path
/// * `bridge` - When given, engine events are also forwarded to it
///
/// # Errors
///
/// Returns [`Error::Io`] if the log file cannot be opened.
///
/// Returns [`Error::Config`] if:
/// - The syslog socket cannot be found (Linux: `/dev/log`, macOS: `/var/run/syslog`)
/// - Another global subscriber is already installed
///
/// # Notes
///
/// - The `RUST_LOG` environment variable can override the configured level
/// - File logging appends to existing files through a non-blocking writer
/// - Syslog messages are prefixed with "onion-embed:"
pub fn init(config: &Config, bridge: Option<Arc<LogBridge>>) -> Result<()> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.as_filter()));

    let mut layers: Vec<BoxedLayer> = vec![output_layer(config.logfile.as_deref(), env_filter)?];
    if let Some(bridge) = bridge {
        layers.push(
            forwarding_layer::<Registry>(bridge.emitter("engine"), config.engine_loglevel).boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to set logger: {}", e)))?;

    LOGGER_INITIALIZED.get_or_init(|| ());
    Ok(())
}

fn output_layer(logfile: Option<&str>, env_filter: EnvFilter) -> Result<BoxedLayer> {
    let layer = match logfile {
        None => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_filter(env_filter)
            .boxed(),
        Some(":syslog:") => {
            let syslog_path = syslog_socket()?;
            tracing_subscriber::fmt::layer()
                .with_writer(move || SyslogWriter::connect(syslog_path))
                .with_target(false)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_filter(env_filter)
                .boxed()
        }
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = FILE_GUARD.set(guard);
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_filter(env_filter)
                .boxed()
        }
    };
    Ok(layer)
}

fn syslog_socket() -> Result<&'static str> {
    if Path::new("/dev/log").exists() {
        Ok("/dev/log")
    } else if Path::new("/var/run/syslog").exists() {
        Ok("/var/run/syslog")
    } else {
        Err(Error::Config("no syslog socket found".to_string()))
    }
}

struct SyslogWriter {
    socket: Option<UnixDatagram>,
}

impl SyslogWriter {
    fn connect(path: &str) -> Self {
        let socket = UnixDatagram::unbound().and_then(|sock| {
            sock.connect(path)?;
            Ok(sock)
        });
        Self {
            socket: socket.ok(),
        }
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(ref socket) = self.socket {
            let msg = format!("onion-embed: {}", String::from_utf8_lossy(buf));
            socket.send(msg.as_bytes())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Returns true for targets produced by the engine's crates.
pub fn is_engine_target(target: &str) -> bool {
    target.starts_with("arti") || target.starts_with("tor_")
}

/// Layer that turns tracing events into [`LogRecord`]s on a [`LogEmitter`].
///
/// Records keep the event's target; `emitter`'s target is unused.
#[derive(Debug, Clone)]
pub struct ForwardLayer {
    emitter: LogEmitter,
}

impl ForwardLayer {
    /// Creates a layer forwarding every event it sees to `emitter`.
    pub fn new(emitter: LogEmitter) -> Self {
        Self { emitter }
    }
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.emitter.emit_record(LogRecord::new(
            LogLevel::from(metadata.level()),
            metadata.target(),
            visitor.finish(),
        ));
    }
}

/// Builds the engine-forwarding layer with its own filter.
///
/// Only events from engine targets (see [`is_engine_target`]) at or above `min`
/// are forwarded. `Notice` admits `info!` events, as tracing has no notice level.
pub fn forwarding_layer<S>(emitter: LogEmitter, min: LogLevel) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let floor = match min {
        LogLevel::Notice => LogLevel::Info,
        other => other,
    };
    ForwardLayer::new(emitter).with_filter(filter_fn(move |metadata| {
        is_engine_target(metadata.target()) && LogLevel::from(metadata.level()) >= floor
    }))
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Log a message at the specified level.
///
/// # Level Mapping
///
/// | LogLevel | tracing macro |
/// |----------|---------------|
/// | Debug | `debug!` |
/// | Info | `info!` |
/// | Notice | `info!` |
/// | Warn | `warn!` |
/// | Error | `error!` |
///
/// # Example
///
/// ```rust
/// use onion_embed::{LogLevel, logger};
///
/// logger::plog(LogLevel::Notice, "Engine started");
/// logger::plog(LogLevel::Error, "Failed to bind SOCKS port");
/// ```
///
/// # See Also
///
/// - [`init`] - Initialize logging before calling plog
/// - [`plog_fmt`](crate::plog_fmt) - Formatted logging macro
pub fn plog(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info => info!("{}", message),
        LogLevel::Notice => info!("{}", message),
        LogLevel::Warn => warn!("{}", message),
        LogLevel::Error => error!("{}", message),
    }
}

/// Log a formatted message at the specified level.
///
/// # Example
///
/// ```rust
/// use onion_embed::{LogLevel, plog_fmt};
///
/// plog_fmt!(LogLevel::Notice, "SOCKS proxy listening on port {}", 9050);
/// ```
#[macro_export]
macro_rules! plog_fmt {
    ($level:expr, $($arg:tt)*) => {
        $crate::logger::plog($level, &format!($($arg)*))
    };
}
