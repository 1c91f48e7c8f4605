//! Runtime lifecycle controller.
//!
//! [`RuntimeController`] owns the embedded engine and serializes every
//! phase-changing operation behind a single gate. It is the piece hosts talk to,
//! either directly from Rust or through the C ABI in [`crate::ffi`].
//!
//! # Lifecycle
//!
//! ```text
//!                      initialize(dir)                 start_proxy(port)
//!   ┌───────────────┐ ────────────────▶ ┌─────────────┐ ────────────────▶ ┌──────────────┐
//!   │ Uninitialized │                   │ Initialized │                   │ ProxyRunning │
//!   └───────────────┘ ◀──────────────── └─────────────┘                   └──────┬───────┘
//!           ▲               stop()                                               │
//!           └────────────────────────────────────────────────────────────────────┘
//!                                           stop()
//! ```
//!
//! # Transition Table
//!
//! | Phase | `initialize` | `start_proxy` | `stop` |
//! |-------|--------------|---------------|--------|
//! | Uninitialized | → Initialized, or `InvalidPath` / `EngineConfig` | `NotInitialized` | no-op, Ok |
//! | Initialized | `AlreadyInitialized` | → ProxyRunning, or `InvalidPort` / `ListenerBind` | → Uninitialized |
//! | ProxyRunning | `AlreadyInitialized` | `AlreadyRunning` | → Uninitialized |
//!
//! Failed operations never change the phase. `stop` always succeeds; engine
//! shutdown errors are reported through the log bridge as
//! [`Error::InternalShutdown`] and converted to a successful return.
//!
//! # Concurrency
//!
//! All operations, queries included, take the same gate and hold it for their
//! full duration, engine calls included. A slow engine call therefore blocks
//! every other caller. Log delivery never takes the gate, and log registration
//! goes through [`LogBridge::set_sink`], so a host can swap its callback while a
//! phase change is in progress.
//!
//! Panics raised by the engine are caught. A gate poisoned by a panic elsewhere is
//! recovered; the phase register is only rewritten by code that cannot panic.
//!
//! # Example
//!
//! ```rust,ignore
//! use onion_embed::{RuntimeController, Phase};
//! use onion_embed::arti::ArtiFactory;
//!
//! let controller = RuntimeController::new(ArtiFactory::default());
//! controller.initialize("/var/lib/myapp/tor")?;
//! controller.start_proxy(9050)?;
//! assert_eq!(controller.phase(), Phase::ProxyRunning);
//! controller.stop()?;
//! ```

use std::any::Any;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bridge::{markers, LogBridge, LogEmitter, LogSink};
use crate::config::{Config, LogLevel};
use crate::engine::{Engine, EngineFactory, ListenerHandle};
use crate::error::{Error, Result};
use crate::logger::plog;
use crate::plog_fmt;

const PROBE_FILE: &str = ".onion-embed-probe";

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No engine exists. Also the phase after `stop`.
    Uninitialized,
    /// An engine is configured but no listener is open.
    Initialized,
    /// The engine serves SOCKS on a bound port.
    ProxyRunning,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Uninitialized => write!(f, "Uninitialized"),
            Phase::Initialized => write!(f, "Initialized"),
            Phase::ProxyRunning => write!(f, "ProxyRunning"),
        }
    }
}

enum Lifecycle {
    Uninitialized,
    Initialized {
        data_dir: PathBuf,
        engine: Box<dyn Engine>,
    },
    ProxyRunning {
        data_dir: PathBuf,
        engine: Box<dyn Engine>,
        listener: ListenerHandle,
    },
}

impl Lifecycle {
    fn phase(&self) -> Phase {
        match self {
            Lifecycle::Uninitialized => Phase::Uninitialized,
            Lifecycle::Initialized { .. } => Phase::Initialized,
            Lifecycle::ProxyRunning { .. } => Phase::ProxyRunning,
        }
    }

    fn data_dir(&self) -> Option<&Path> {
        match self {
            Lifecycle::Uninitialized => None,
            Lifecycle::Initialized { data_dir, .. } | Lifecycle::ProxyRunning { data_dir, .. } => {
                Some(data_dir.as_path())
            }
        }
    }

    fn listener(&self) -> Option<ListenerHandle> {
        match self {
            Lifecycle::ProxyRunning { listener, .. } => Some(*listener),
            _ => None,
        }
    }

    fn with_listener(self, listener: ListenerHandle) -> Self {
        match self {
            Lifecycle::Initialized { data_dir, engine } => Lifecycle::ProxyRunning {
                data_dir,
                engine,
                listener,
            },
            other => other,
        }
    }
}

/// Drives one embedded engine through its lifecycle.
///
/// Independent controllers can coexist in one process; the C ABI uses exactly
/// one.
pub struct RuntimeController {
    gate: Mutex<Lifecycle>,
    bridge: Arc<LogBridge>,
    events: LogEmitter,
    factory: Box<dyn EngineFactory>,
}

impl fmt::Debug for RuntimeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeController")
            .field("engine", &self.factory.name())
            .field("phase", &self.phase())
            .finish()
    }
}

impl RuntimeController {
    /// Creates a controller with a default-sized log bridge.
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self::with_config(factory, &Config::default())
    }

    /// Creates a controller whose log bridge is sized from `config`.
    pub fn with_config(factory: impl EngineFactory + 'static, config: &Config) -> Self {
        Self::with_bridge(factory, LogBridge::new(config.log_queue_capacity))
    }

    /// Creates a controller on an existing log bridge.
    ///
    /// Used when the bridge must exist before the controller, for example to
    /// hand it to the process logger.
    pub fn with_bridge(factory: impl EngineFactory + 'static, bridge: Arc<LogBridge>) -> Self {
        let events = bridge.emitter("controller");
        Self {
            gate: Mutex::new(Lifecycle::Uninitialized),
            bridge,
            events,
            factory: Box::new(factory),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates and configures the engine with `data_dir`.
    ///
    /// The directory must be absolute; it is created if missing and must be
    /// writable.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInitialized`] if an engine already exists
    /// - [`Error::InvalidPath`] if the directory is unusable
    /// - [`Error::EngineConfig`] if the engine rejects it or panics
    pub fn initialize(&self, data_dir: impl AsRef<Path>) -> Result<()> {
        let mut state = self.lock();
        if !matches!(*state, Lifecycle::Uninitialized) {
            return Err(Error::AlreadyInitialized);
        }

        let data_dir = validate_data_dir(data_dir.as_ref())?;
        let logs = self.bridge.emitter(self.factory.name());

        let configured =
            panic::catch_unwind(AssertUnwindSafe(|| self.factory.configure(&data_dir, logs)));
        let engine = match configured {
            Ok(Ok(engine)) => engine,
            Ok(Err(e)) => return Err(self.report(Error::EngineConfig(e.to_string()))),
            Err(payload) => {
                return Err(self.report(Error::EngineConfig(format!(
                    "engine panicked: {}",
                    panic_message(payload.as_ref())
                ))))
            }
        };

        plog_fmt!(
            LogLevel::Notice,
            "Engine '{}' initialized in {}",
            self.factory.name(),
            data_dir.display()
        );
        *state = Lifecycle::Initialized { data_dir, engine };
        self.events.emit(LogLevel::Notice, markers::INITIALIZED);
        Ok(())
    }

    /// Opens the SOCKS listener on `port`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `initialize`
    /// - [`Error::AlreadyRunning`] while a listener is open; it keeps running
    /// - [`Error::InvalidPort`] outside `1..=65535`
    /// - [`Error::ListenerBind`] if the engine cannot bind
    pub fn start_proxy(&self, port: i32) -> Result<()> {
        let mut state = self.lock();
        let engine = match &mut *state {
            Lifecycle::Uninitialized => return Err(Error::NotInitialized),
            Lifecycle::ProxyRunning { listener, .. } => {
                return Err(Error::AlreadyRunning(listener.port()))
            }
            Lifecycle::Initialized { engine, .. } => engine,
        };
        let port = validate_port(port)?;

        self.events.emit(LogLevel::Notice, markers::STARTING);
        let bound = panic::catch_unwind(AssertUnwindSafe(|| engine.bind_socks_listener(port)));
        let listener = match bound {
            Ok(Ok(listener)) => listener,
            Ok(Err(e)) => {
                return Err(self.report(Error::ListenerBind {
                    port,
                    reason: e.to_string(),
                }))
            }
            Err(payload) => {
                return Err(self.report(Error::ListenerBind {
                    port,
                    reason: format!("engine panicked: {}", panic_message(payload.as_ref())),
                }))
            }
        };

        plog_fmt!(LogLevel::Notice, "SOCKS proxy listening on {}", listener.addr);
        let previous = std::mem::replace(&mut *state, Lifecycle::Uninitialized);
        *state = previous.with_listener(listener);
        Ok(())
    }

    /// Closes the listener, shuts the engine down and returns to
    /// [`Phase::Uninitialized`].
    ///
    /// Always returns `Ok`. Calling it with no engine is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        let (engine, listener) = match std::mem::replace(&mut *state, Lifecycle::Uninitialized) {
            Lifecycle::Uninitialized => return Ok(()),
            Lifecycle::Initialized { engine, .. } => (engine, None),
            Lifecycle::ProxyRunning {
                engine, listener, ..
            } => (engine, Some(listener)),
        };

        self.events.emit(LogLevel::Notice, markers::STOPPING);
        self.teardown(engine, listener);
        self.events.emit(LogLevel::Notice, markers::STOPPED);
        plog(LogLevel::Notice, "Engine stopped");
        Ok(())
    }

    fn teardown(&self, mut engine: Box<dyn Engine>, listener: Option<ListenerHandle>) {
        if let Some(listener) = listener {
            let closed = panic::catch_unwind(AssertUnwindSafe(|| engine.close_listener(listener)));
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.report(Error::InternalShutdown(format!(
                        "closing listener on port {}: {}",
                        listener.port(),
                        e
                    )));
                }
                Err(payload) => {
                    self.report(Error::InternalShutdown(format!(
                        "closing listener panicked: {}",
                        panic_message(payload.as_ref())
                    )));
                }
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(move || engine.shutdown())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.report(Error::InternalShutdown(e.to_string()));
            }
            Err(payload) => {
                self.report(Error::InternalShutdown(format!(
                    "engine panicked: {}",
                    panic_message(payload.as_ref())
                )));
            }
        }
    }

    fn report(&self, err: Error) -> Error {
        plog_fmt!(LogLevel::Error, "{}", err);
        self.events.error(err.to_string());
        err
    }

    /// Registers the host log sink, replacing any previous one.
    ///
    /// Does not take the lifecycle gate.
    pub fn set_log_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        self.bridge.set_sink(sink);
    }

    /// The log bridge carrying this controller's records.
    pub fn bridge(&self) -> &Arc<LogBridge> {
        &self.bridge
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    /// Bound SOCKS port while the proxy runs.
    pub fn socks_port(&self) -> Option<u16> {
        self.lock().listener().map(|l| l.port())
    }

    /// Address of the SOCKS listener while the proxy runs.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.lock().listener().map(|l| l.addr)
    }

    /// Data directory given to the successful `initialize`, until `stop`.
    pub fn data_directory(&self) -> Option<PathBuf> {
        self.lock().data_dir().map(Path::to_path_buf)
    }
}

impl Drop for RuntimeController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn validate_data_dir(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::invalid_path(path, "path is empty"));
    }
    if !path.is_absolute() {
        return Err(Error::invalid_path(path, "path is not absolute"));
    }
    fs::create_dir_all(path)
        .map_err(|e| Error::invalid_path(path, format!("cannot create directory: {}", e)))?;
    if !path.is_dir() {
        return Err(Error::invalid_path(path, "not a directory"));
    }

    let probe = path.join(PROBE_FILE);
    fs::write(&probe, b"probe")
        .map_err(|e| Error::invalid_path(path, format!("not writable: {}", e)))?;
    remove_probe(&probe);

    Ok(path.to_path_buf())
}

fn remove_probe(probe: &Path) -> bool {
    match fs::remove_file(probe) {
        Ok(()) => true,
        Err(e) => {
            plog_fmt!(
                LogLevel::Debug,
                "Could not remove write probe {}: {}",
                probe.display(),
                e
            );
            false
        }
    }
}

fn validate_port(port: i32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(Error::InvalidPort(i64::from(port))),
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LogRecord;
    use crate::engine::fake::FakeFactory;
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup() -> (RuntimeController, FakeFactory, TempDir) {
        let factory = FakeFactory::new();
        let controller = RuntimeController::new(factory.clone());
        (controller, factory, tempfile::tempdir().unwrap())
    }

    fn collect(controller: &RuntimeController) -> Arc<Mutex<Vec<LogRecord>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        controller.set_log_sink(Some(Arc::new(move |record: &LogRecord| {
            sink_seen.lock().unwrap().push(record.clone());
        })));
        seen
    }

    #[test]
    fn test_full_lifecycle_scenario() {
        let (controller, factory, dir) = setup();

        assert!(controller.initialize(dir.path()).is_ok());
        assert!(controller.start_proxy(9050).is_ok());
        assert_eq!(controller.phase(), Phase::ProxyRunning);
        assert_eq!(controller.socks_port(), Some(9050));

        let err = controller.start_proxy(9050).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(9050)));
        assert_eq!(err.status_code(), -6);
        assert!(factory.is_bound(9050));

        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert!(!factory.is_bound(9050));
        assert_eq!(factory.live_engines(), 0);

        assert!(matches!(
            controller.start_proxy(9050),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_start_before_initialize() {
        let (controller, factory, _dir) = setup();
        assert!(matches!(
            controller.start_proxy(9050),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(controller.start_proxy(0), Err(Error::NotInitialized)));
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert_eq!(factory.engines_created(), 0);
    }

    #[test]
    fn test_double_initialize_keeps_first_engine() {
        let (controller, factory, dir) = setup();
        let other = tempfile::tempdir().unwrap();

        controller.initialize(dir.path()).unwrap();
        assert!(matches!(
            controller.initialize(other.path()),
            Err(Error::AlreadyInitialized)
        ));
        assert_eq!(controller.data_directory(), Some(dir.path().to_path_buf()));
        assert_eq!(factory.engines_created(), 1);
        assert_eq!(factory.live_engines(), 1);

        controller.start_proxy(9051).unwrap();
        assert!(matches!(
            controller.initialize(other.path()),
            Err(Error::AlreadyInitialized)
        ));
        assert_eq!(controller.socks_port(), Some(9051));
    }

    #[test]
    fn test_invalid_paths() {
        let (controller, factory, _dir) = setup();
        let file = tempfile::NamedTempFile::new().unwrap();

        for path in [
            PathBuf::new(),
            PathBuf::from("relative/dir"),
            file.path().to_path_buf(),
            file.path().join("below-a-file"),
        ] {
            let err = controller.initialize(&path).unwrap_err();
            assert!(matches!(err, Error::InvalidPath { .. }), "{:?}", path);
            assert_eq!(controller.phase(), Phase::Uninitialized);
        }
        assert_eq!(factory.engines_created(), 0);
    }

    #[test]
    fn test_initialize_creates_missing_directory() {
        let (controller, factory, dir) = setup();
        let nested = dir.path().join("a").join("b");

        controller.initialize(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(PROBE_FILE).exists());
        assert_eq!(factory.configured_dirs(), vec![nested]);
    }

    #[test]
    fn test_probe_cleanup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join(PROBE_FILE);

        fs::write(&probe, b"probe").unwrap();
        assert!(remove_probe(&probe));
        assert!(!probe.exists());
        assert!(!remove_probe(&probe));
    }

    #[test]
    fn test_invalid_ports() {
        let (controller, _factory, dir) = setup();
        controller.initialize(dir.path()).unwrap();

        for port in [0, -1, 65536, i32::MAX, i32::MIN] {
            let err = controller.start_proxy(port).unwrap_err();
            assert!(matches!(err, Error::InvalidPort(p) if p == i64::from(port)));
            assert_eq!(controller.phase(), Phase::Initialized);
        }
        assert!(controller.start_proxy(65535).is_ok());
    }

    #[test]
    fn test_bind_failure_keeps_initialized() {
        let (controller, factory, dir) = setup();
        factory.occupy(9050);
        controller.initialize(dir.path()).unwrap();

        let err = controller.start_proxy(9050).unwrap_err();
        assert!(matches!(err, Error::ListenerBind { port: 9050, .. }));
        assert_eq!(controller.phase(), Phase::Initialized);
        assert_eq!(controller.socks_port(), None);

        controller.start_proxy(9052).unwrap();
        assert_eq!(controller.socks_port(), Some(9052));
    }

    #[test]
    fn test_stop_from_every_phase() {
        let (controller, factory, dir) = setup();

        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);

        controller.initialize(dir.path()).unwrap();
        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert_eq!(controller.data_directory(), None);

        controller.initialize(dir.path()).unwrap();
        controller.start_proxy(9053).unwrap();
        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert_eq!(controller.listener_addr(), None);
        assert_eq!(factory.live_engines(), 0);
    }

    #[test]
    fn test_shutdown_error_is_logged_not_returned() {
        let (controller, factory, dir) = setup();
        let seen = collect(&controller);
        factory.fail_shutdown(true);

        controller.initialize(dir.path()).unwrap();
        controller.start_proxy(9054).unwrap();
        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert_eq!(factory.live_engines(), 0);

        assert!(controller.bridge().flush(WAIT));
        let rendered: Vec<String> = seen.lock().unwrap().iter().map(|r| r.render()).collect();
        assert!(rendered
            .iter()
            .any(|line| line.starts_with("ERROR: ") && line.contains("shutdown")));
        assert!(rendered.iter().any(|line| line == markers::STOPPED));
    }

    #[test]
    fn test_shutdown_panic_still_converges() {
        let (controller, factory, dir) = setup();
        factory.panic_shutdown(true);

        controller.initialize(dir.path()).unwrap();
        controller.start_proxy(9055).unwrap();
        assert!(controller.stop().is_ok());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        assert_eq!(factory.live_engines(), 0);
        assert!(!factory.is_bound(9055));

        factory.panic_shutdown(false);
        assert!(controller.initialize(dir.path()).is_ok());
    }

    #[test]
    fn test_configure_failures() {
        let (controller, factory, dir) = setup();

        factory.fail_configure(true);
        let err = controller.initialize(dir.path()).unwrap_err();
        assert_eq!(err.status_code(), -2);
        assert_eq!(controller.phase(), Phase::Uninitialized);

        factory.fail_configure(false);
        factory.panic_configure(true);
        assert!(matches!(
            controller.initialize(dir.path()),
            Err(Error::EngineConfig(_))
        ));
        assert_eq!(controller.phase(), Phase::Uninitialized);

        factory.panic_configure(false);
        assert!(controller.initialize(dir.path()).is_ok());
    }

    #[test]
    fn test_bind_panic_reports_bind_error() {
        let (controller, factory, dir) = setup();
        controller.initialize(dir.path()).unwrap();

        factory.panic_bind(true);
        assert!(matches!(
            controller.start_proxy(9056),
            Err(Error::ListenerBind { port: 9056, .. })
        ));
        assert_eq!(controller.phase(), Phase::Initialized);
        assert!(controller.stop().is_ok());
    }

    #[test]
    fn test_markers_in_order() {
        let (controller, _factory, dir) = setup();
        let seen = collect(&controller);

        controller.initialize(dir.path()).unwrap();
        controller.start_proxy(9057).unwrap();
        controller.stop().unwrap();

        assert!(controller.bridge().flush(WAIT));
        let all_markers = [
            markers::INITIALIZED,
            markers::STARTING,
            markers::SOCKS_FUNCTIONAL,
            markers::GUARD_USABLE,
            markers::STOPPING,
            markers::STOPPED,
        ];
        let lines: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.render())
            .filter(|line| all_markers.contains(&line.as_str()))
            .collect();
        assert_eq!(lines, all_markers);
    }

    #[test]
    fn test_sink_registered_early_receives_engine_records() {
        let (controller, _factory, dir) = setup();
        let seen = collect(&controller);

        controller.initialize(dir.path()).unwrap();
        controller.start_proxy(9058).unwrap();

        assert!(controller.bridge().flush(WAIT));
        assert!(seen.lock().unwrap().iter().any(|r| r.target == "fake"));
    }

    #[test]
    fn test_controllers_are_independent() {
        let factory = FakeFactory::new();
        let first = RuntimeController::new(factory.clone());
        let second = RuntimeController::new(factory.clone());
        let dir = tempfile::tempdir().unwrap();

        first.initialize(dir.path()).unwrap();
        second.initialize(dir.path()).unwrap();
        first.start_proxy(9059).unwrap();
        assert!(matches!(
            second.start_proxy(9059),
            Err(Error::ListenerBind { .. })
        ));
        assert_eq!(second.phase(), Phase::Initialized);

        drop(first);
        assert_eq!(factory.live_engines(), 1);
        second.start_proxy(9059).unwrap();
    }

    #[test]
    fn test_concurrent_operations_never_tear() {
        let factory = FakeFactory::new();
        let controller = Arc::new(RuntimeController::new(factory.clone()));
        let dir = tempfile::tempdir().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let controller = controller.clone();
                let factory = factory.clone();
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        match (t + i) % 3 {
                            0 => {
                                let _ = controller.initialize(&path);
                            }
                            1 => {
                                let _ = controller.start_proxy(9060);
                            }
                            _ => {
                                controller.stop().unwrap();
                            }
                        }
                        assert!(factory.live_engines() <= 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        match controller.phase() {
            Phase::ProxyRunning => assert_eq!(controller.socks_port(), Some(9060)),
            Phase::Initialized => assert_eq!(controller.socks_port(), None),
            Phase::Uninitialized => assert_eq!(factory.live_engines(), 0),
        }
        controller.stop().unwrap();
        assert_eq!(factory.live_engines(), 0);
        assert!(!factory.is_bound(9060));
    }

    #[test]
    fn test_set_sink_during_blocked_operation() {
        let (controller, _factory, dir) = setup();
        let controller = Arc::new(controller);

        let guard = controller.lock();
        let other = controller.clone();
        let handle = std::thread::spawn(move || {
            other.set_log_sink(Some(Arc::new(|_: &LogRecord| {})));
            other.bridge().has_sink()
        });
        assert!(handle.join().unwrap());
        drop(guard);

        controller.initialize(dir.path()).unwrap();
    }

    #[test]
    fn test_poisoned_gate_is_recovered() {
        let (controller, _factory, dir) = setup();
        let controller = Arc::new(controller);

        let poisoner = controller.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.gate.lock().unwrap();
            panic!("poison the gate");
        })
        .join();

        assert!(controller.gate.is_poisoned());
        assert_eq!(controller.phase(), Phase::Uninitialized);
        controller.initialize(dir.path()).unwrap();
        assert_eq!(controller.phase(), Phase::Initialized);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
