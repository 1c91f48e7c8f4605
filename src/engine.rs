//! Engine capability traits.
//!
//! The controller never talks to Arti directly. It drives an [`Engine`] created by an
//! [`EngineFactory`], which keeps the lifecycle logic testable without a network and
//! lets hosts plug in a different backend.
//!
//! # Engine Lifecycle
//!
//! ```text
//!   EngineFactory::configure(data_dir, logs)
//!              │
//!              ▼
//!        ┌───────────┐  bind_socks_listener(port)  ┌──────────────────┐
//!        │  Engine   │────────────────────────────▶│ ListenerHandle   │
//!        │           │◀────────────────────────────│                  │
//!        └─────┬─────┘     close_listener(handle)  └──────────────────┘
//!              │
//!              ▼
//!        shutdown(self)   ◄── consumes the engine
//! ```
//!
//! Engines report log output through the [`LogEmitter`] handed to `configure`.
//! An engine emits at least one record after a successful bind.
//!
//! # Backends
//!
//! | Backend | Module | Availability |
//! |---------|--------|--------------|
//! | Arti | [`crate::arti`] | feature `arti` (default) |
//! | Fake | `engine::fake` | unit tests |

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::bridge::LogEmitter;

/// Errors reported by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected its configuration or could not start.
    #[error("configuration rejected: {0}")]
    Config(String),

    /// The SOCKS listener could not be bound.
    #[error("cannot bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A listener handle did not belong to this engine.
    #[error("unknown listener {0}")]
    UnknownListener(u64),

    /// Failure in the engine's runtime.
    #[error("runtime failure: {0}")]
    Runtime(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// An open SOCKS listener owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    /// Engine-assigned identifier.
    pub id: u64,
    /// Address the listener is bound to.
    pub addr: SocketAddr,
}

impl ListenerHandle {
    /// The bound TCP port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Creates configured engines.
pub trait EngineFactory: Send + Sync {
    /// Short name used as the log target for engine records.
    fn name(&self) -> &'static str;

    /// Creates an engine that keeps its state under `data_dir`.
    ///
    /// `data_dir` has already been validated as an absolute, writable directory.
    fn configure(&self, data_dir: &Path, logs: LogEmitter) -> EngineResult<Box<dyn Engine>>;
}

/// A configured onion-routing engine.
pub trait Engine: Send {
    /// Opens a SOCKS listener on `port`.
    fn bind_socks_listener(&mut self, port: u16) -> EngineResult<ListenerHandle>;

    /// Closes a listener opened by [`bind_socks_listener`](Engine::bind_socks_listener).
    ///
    /// The port is released before this returns.
    fn close_listener(&mut self, listener: ListenerHandle) -> EngineResult<()>;

    /// Shuts the engine down and releases every resource it holds.
    ///
    /// Resources are released even when an error is returned.
    fn shutdown(self: Box<Self>) -> EngineResult<()>;
}


#[cfg(test)]
mod tests {
    use super::fake::FakeFactory;
    use super::*;
    use crate::bridge::LogBridge;

    #[test]
    fn test_listener_handle_port() {
        let handle = ListenerHandle {
            id: 3,
            addr: "127.0.0.1:9150".parse().unwrap(),
        };
        assert_eq!(handle.port(), 9150);
    }

    #[test]
    fn test_bind_error_display() {
        let err = EngineError::Bind {
            port: 9050,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("9050"));
    }

    #[test]
    fn test_fake_engine_tracks_ports() {
        let bridge = LogBridge::new(16);
        let factory = FakeFactory::new();
        let mut engine = factory
            .configure(Path::new("/tmp/fake"), bridge.emitter("fake"))
            .unwrap();
        assert_eq!(factory.live_engines(), 1);

        let handle = engine.bind_socks_listener(9050).unwrap();
        assert!(factory.is_bound(9050));
        assert!(matches!(
            engine.bind_socks_listener(9050),
            Err(EngineError::Bind { port: 9050, .. })
        ));

        engine.close_listener(handle).unwrap();
        assert!(!factory.is_bound(9050));
        assert!(matches!(
            engine.close_listener(handle),
            Err(EngineError::UnknownListener(_))
        ));

        engine.bind_socks_listener(9051).unwrap();
        engine.shutdown().unwrap();
        assert!(!factory.is_bound(9051));
        assert_eq!(factory.live_engines(), 0);
    }
}
