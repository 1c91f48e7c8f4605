//! Error types for onion-embed.
//!
//! This module defines the [`enum@Error`] enum representing every failure a host
//! can observe from the runtime controller, together with the stable negative
//! status codes those failures map to at the C ABI.
//!
//! # Overview
//!
//! The error system is designed to provide:
//!
//! - **Distinct categories** for every lifecycle failure the host must tell apart
//! - **Stable status codes** that never change meaning between releases
//! - **Local failures**: nothing unwinds across the ABI, every call returns a code
//!
//! # Error Categories
//!
//! ```text
//!   Error
//!   ├── InvalidPath            ◄── data directory unusable
//!   ├── EngineConfig           ◄── engine rejected its configuration
//!   ├── AlreadyInitialized     ◄── initialize() while an engine exists
//!   ├── NotInitialized         ◄── start_proxy() before initialize()
//!   ├── InvalidPort            ◄── port outside 1..=65535
//!   ├── AlreadyRunning         ◄── start_proxy() while the proxy runs
//!   ├── ListenerBind           ◄── port in use / OS bind failure
//!   ├── InternalShutdown       ◄── logged only, never returned by stop()
//!   ├── Internal               ◄── panic caught at the ABI boundary
//!   ├── Io                     ◄── configuration file I/O
//!   └── Config                 ◄── invalid configuration
//! ```
//!
//! # Status Codes
//!
//! | Error | Code | Phase changed? |
//! |-------|------|----------------|
//! | [`InvalidPath`](Error::InvalidPath) | -1 | No |
//! | [`EngineConfig`](Error::EngineConfig) | -2 | No |
//! | [`AlreadyInitialized`](Error::AlreadyInitialized) | -3 | No |
//! | [`NotInitialized`](Error::NotInitialized) | -4 | No |
//! | [`InvalidPort`](Error::InvalidPort) | -5 | No |
//! | [`AlreadyRunning`](Error::AlreadyRunning) | -6 | No |
//! | [`ListenerBind`](Error::ListenerBind) | -7 | No |
//! | [`InternalShutdown`](Error::InternalShutdown) | -8 | stop() still converges |
//! | [`Internal`](Error::Internal) | -9 | No |
//! | [`Io`](Error::Io), [`Config`](Error::Config) | -10 | Not lifecycle errors |
//!
//! # Example
//!
//! ```rust
//! use onion_embed::{Error, STATUS_OK};
//!
//! fn describe(code: i32) -> &'static str {
//!     match code {
//!         STATUS_OK => "ok",
//!         c if c == Error::NotInitialized.status_code() => "call initialize first",
//!         c if c == Error::AlreadyRunning(0).status_code() => "proxy already up",
//!         _ => "failed",
//!     }
//! }
//!
//! assert_eq!(describe(0), "ok");
//! assert_eq!(describe(-4), "call initialize first");
//! assert_eq!(describe(-6), "proxy already up");
//! ```
//!
//! # See Also
//!
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`crate::engine::EngineError`] - Errors reported by the engine collaborator
//! - [`crate::ffi`] - Where codes cross the boundary

use std::path::PathBuf;

use thiserror::Error;

/// Status code returned by every successful operation.
pub const STATUS_OK: i32 = 0;

/// Errors that can occur while driving the embedded runtime.
///
/// Every lifecycle variant maps to a distinct, stable negative status code via
/// [`Error::status_code`]. Lifecycle failures never change the controller's
/// phase; see [`crate::controller`] for the transition table.
///
/// # Example
///
/// ```rust
/// use onion_embed::Error;
///
/// let err = Error::InvalidPort(70000);
/// assert_eq!(err.status_code(), -5);
/// assert!(err.to_string().contains("70000"));
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// The data directory is missing, not absolute, not a directory, or not
    /// writable.
    #[error("invalid data directory {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path, as given by the host.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The engine rejected its configuration or failed to come up.
    #[error("engine configuration failed: {0}")]
    EngineConfig(String),

    /// `initialize` was called while an engine already exists.
    ///
    /// The existing engine and data directory are left untouched. Call
    /// `stop` first.
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    /// `start_proxy` was called before `initialize`.
    #[error("runtime is not initialized")]
    NotInitialized,

    /// The requested port is outside `1..=65535`.
    #[error("invalid SOCKS port: {0}")]
    InvalidPort(i64),

    /// `start_proxy` was called while the proxy is already listening.
    ///
    /// The running listener is left untouched.
    #[error("SOCKS proxy is already running on port {0}")]
    AlreadyRunning(u16),

    /// The engine could not bind the SOCKS listener.
    #[error("failed to bind SOCKS listener on port {port}: {reason}")]
    ListenerBind {
        /// The port that could not be bound.
        port: u16,
        /// OS or engine level reason.
        reason: String,
    },

    /// The engine reported an error while shutting down.
    ///
    /// This error is logged through the log bridge and never returned from
    /// `stop`, which always converges to the uninitialized phase.
    #[error("engine shutdown error: {0}")]
    InternalShutdown(String),

    /// An unexpected panic was caught at the ABI boundary.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error while reading or writing configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds an [`Error::InvalidPath`] for `path`.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stable negative status code for this error.
    ///
    /// Codes are part of the ABI contract and never change meaning.
    pub fn status_code(&self) -> i32 {
        match self {
            Error::InvalidPath { .. } => -1,
            Error::EngineConfig(_) => -2,
            Error::AlreadyInitialized => -3,
            Error::NotInitialized => -4,
            Error::InvalidPort(_) => -5,
            Error::AlreadyRunning(_) => -6,
            Error::ListenerBind { .. } => -7,
            Error::InternalShutdown(_) => -8,
            Error::Internal(_) => -9,
            Error::Io(_) | Error::Config(_) => -10,
        }
    }
}

/// Result type alias for onion-embed operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts an operation result into its ABI status code.
///
/// # Example
///
/// ```rust
/// use onion_embed::{error::status_of, Error};
///
/// assert_eq!(status_of::<()>(&Ok(())), 0);
/// assert_eq!(status_of::<()>(&Err(Error::NotInitialized)), -4);
/// ```
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}
