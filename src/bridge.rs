//! Log bridging between the engine and the host's log callback.
//!
//! The bridge carries [`LogRecord`]s from wherever they are produced (the
//! controller, the engine, `tracing` events inside Arti) to a single host-supplied
//! [`LogSink`], on a delivery thread that belongs to the bridge.
//!
//! # Overview
//!
//! ```text
//!   ┌────────────┐   try_send    ┌──────────────────┐   recv    ┌──────────────┐
//!   │ LogEmitter │──────────────▶│ bounded channel  │─────────▶│ log-bridge   │
//!   │ (engine,   │  (never       │ (capacity from   │           │ thread       │
//!   │ controller)│   blocks)     │  Config)         │           └──────┬───────┘
//!   └────────────┘               └──────────────────┘                  │
//!                                                                      │ current sink,
//!                                  set_sink() ──▶ RwLock<sink> ◀───────┘ read per record
//! ```
//!
//! # Guarantees
//!
//! - **Ordering**: records reach the sink in the order they were enqueued.
//! - **Last writer wins**: each record goes to whichever sink is registered when
//!   it is delivered. A record in flight during [`LogBridge::set_sink`] may still
//!   reach the previous sink.
//! - **No sink, no delivery**: records delivered while no sink is set are dropped.
//! - **Fault isolation**: a panicking sink is counted and skipped; a blocking sink
//!   only stalls the delivery thread. Emitters drop records when the queue is full
//!   instead of waiting, and `set_sink` never waits on a sink call.
//!
//! # Host Markers
//!
//! Existing hosts track status by matching fixed log lines.
//! The texts are kept verbatim in [`markers`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use onion_embed::bridge::{LogBridge, LogRecord};
//! use onion_embed::LogLevel;
//!
//! let bridge = LogBridge::new(16);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink_seen = seen.clone();
//! bridge.set_sink(Some(Arc::new(move |record: &LogRecord| {
//!     sink_seen.lock().unwrap().push(record.render());
//! })));
//!
//! let emitter = bridge.emitter("example");
//! emitter.emit(LogLevel::Info, "hello");
//! emitter.emit(LogLevel::Error, "boom");
//!
//! assert!(bridge.flush(Duration::from_secs(5)));
//! assert_eq!(*seen.lock().unwrap(), vec!["hello", "ERROR: boom"]);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::LogLevel;

/// Fixed log lines recognised by existing hosts.
pub mod markers {
    /// Emitted after a successful `initialize`.
    pub const INITIALIZED: &str = "AMEx: state changed to Initialized";
    /// Emitted when `start_proxy` begins binding.
    pub const STARTING: &str = "AMEx: state changed to Starting";
    /// Emitted when `stop` begins tearing down a live engine.
    pub const STOPPING: &str = "AMEx: state changed to Stopping";
    /// Emitted once `stop` has released the engine.
    pub const STOPPED: &str = "AMEx: state changed to Stopped";
    /// Emitted by the engine once the SOCKS listener accepts connections.
    pub const SOCKS_FUNCTIONAL: &str = "Sufficiently bootstrapped; system SOCKS now functional";
    /// Emitted by the engine once it is ready to carry traffic.
    pub const GUARD_USABLE: &str = "We have found that guard [scrubbed] is usable.";
}

/// A single log record on its way to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity of the record.
    pub level: LogLevel,
    /// Producer of the record (`controller`, `arti`, a tracing target, ...).
    pub target: String,
    /// The message text.
    pub message: String,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            target: target.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Renders the record the way the host callback receives it.
    ///
    /// Error records carry an `ERROR: ` prefix; everything else is passed
    /// through unchanged so marker lines match exactly.
    pub fn render(&self) -> String {
        match self.level {
            LogLevel::Error => format!("ERROR: {}", self.message),
            _ => self.message.clone(),
        }
    }

    /// Formats the record with timestamp, level and target for human output.
    pub fn format(&self) -> String {
        format!(
            "{} {:<6} {}: {}",
            self.timestamp.format("%b %e %H:%M:%S%.3f"),
            self.level,
            self.target,
            self.message
        )
    }
}

/// Receiver of bridged log records.
///
/// Implemented for any `Fn(&LogRecord) + Send + Sync` closure.
pub trait LogSink: Send + Sync {
    /// Delivers one record. Called from the bridge's delivery thread.
    fn deliver(&self, record: &LogRecord);
}

impl<F> LogSink for F
where
    F: Fn(&LogRecord) + Send + Sync,
{
    fn deliver(&self, record: &LogRecord) {
        self(record)
    }
}

/// Counters describing what the bridge has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Records accepted into the queue.
    pub enqueued: u64,
    /// Records handed to a sink that returned normally.
    pub delivered: u64,
    /// Records dropped because the queue was full or the delivery thread is gone.
    pub dropped: u64,
    /// Records dropped because no sink was registered at delivery time.
    pub unsinked: u64,
    /// Sink calls that panicked.
    pub sink_faults: u64,
}

struct Shared {
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    unsinked: AtomicU64,
    sink_faults: AtomicU64,
    settled: Mutex<u64>,
    settled_cv: Condvar,
}

impl Shared {
    fn current_sink(&self) -> Option<Arc<dyn LogSink>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_settled(&self) {
        let mut settled = self.settled.lock().unwrap_or_else(PoisonError::into_inner);
        *settled += 1;
        self.settled_cv.notify_all();
    }
}

/// Sink registry plus the bounded queue and delivery thread feeding it.
pub struct LogBridge {
    shared: Arc<Shared>,
    tx: SyncSender<LogRecord>,
}

impl std::fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBridge")
            .field("has_sink", &self.has_sink())
            .field("stats", &self.stats())
            .finish()
    }
}

impl LogBridge {
    /// Creates a bridge with a queue of `capacity` records and starts its
    /// delivery thread.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let shared = Arc::new(Shared {
            sink: RwLock::new(None),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            unsinked: AtomicU64::new(0),
            sink_faults: AtomicU64::new(0),
            settled: Mutex::new(0),
            settled_cv: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let spawned = std::thread::Builder::new()
            .name("log-bridge".to_string())
            .spawn(move || run_delivery(worker_shared, rx));
        if let Err(e) = spawned {
            // The receiver went down with the closure, so every send reports
            // Disconnected and is counted as dropped.
            tracing::error!("failed to start log delivery thread: {}", e);
        }

        Arc::new(Self { shared, tx })
    }

    /// Replaces the registered sink. `None` unregisters it.
    ///
    /// Never waits for an in-progress sink call.
    pub fn set_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        *self
            .shared
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Returns true if a sink is registered.
    pub fn has_sink(&self) -> bool {
        self.shared
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns an emitter that tags records with `target`.
    pub fn emitter(&self, target: &str) -> LogEmitter {
        LogEmitter {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
            target: Arc::from(target),
        }
    }

    /// Queues a record for delivery without blocking.
    ///
    /// Returns false if the record was dropped.
    pub fn publish(&self, record: LogRecord) -> bool {
        enqueue(&self.shared, &self.tx, record)
    }

    /// Waits until every record enqueued before this call has been handed to
    /// a sink or discarded.
    ///
    /// Returns false if `timeout` elapsed first, for example because the sink
    /// is blocked.
    pub fn flush(&self, timeout: Duration) -> bool {
        let target = self.shared.enqueued.load(Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let mut settled = self
            .shared
            .settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *settled < target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            settled = self
                .shared
                .settled_cv
                .wait_timeout(settled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Returns a snapshot of the bridge counters.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            enqueued: self.shared.enqueued.load(Ordering::SeqCst),
            delivered: self.shared.delivered.load(Ordering::SeqCst),
            dropped: self.shared.dropped.load(Ordering::SeqCst),
            unsinked: self.shared.unsinked.load(Ordering::SeqCst),
            sink_faults: self.shared.sink_faults.load(Ordering::SeqCst),
        }
    }
}

/// Cloneable producer handle for a [`LogBridge`].
///
/// This is the engine's log-record stream: factories receive one in
/// [`EngineFactory::configure`](crate::engine::EngineFactory::configure).
#[derive(Clone)]
pub struct LogEmitter {
    shared: Arc<Shared>,
    tx: SyncSender<LogRecord>,
    target: Arc<str>,
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("target", &self.target)
            .finish()
    }
}

impl LogEmitter {
    /// Emits a record at `level`. Returns false if it was dropped.
    pub fn emit(&self, level: LogLevel, message: impl Into<String>) -> bool {
        let record = LogRecord::new(level, &*self.target, message);
        enqueue(&self.shared, &self.tx, record)
    }

    /// Emits an already built record, keeping its target.
    pub fn emit_record(&self, record: LogRecord) -> bool {
        enqueue(&self.shared, &self.tx, record)
    }

    /// Emits an informational record.
    pub fn info(&self, message: impl Into<String>) -> bool {
        self.emit(LogLevel::Info, message)
    }

    /// Emits an error record.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(LogLevel::Error, message)
    }

    /// Returns a handle for the same bridge with a different target.
    pub fn with_target(&self, target: &str) -> LogEmitter {
        LogEmitter {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
            target: Arc::from(target),
        }
    }

    /// The target attached to records from this emitter.
    pub fn target(&self) -> &str {
        &self.target
    }
}

fn enqueue(shared: &Shared, tx: &SyncSender<LogRecord>, record: LogRecord) -> bool {
    match tx.try_send(record) {
        Ok(()) => {
            shared.enqueued.fetch_add(1, Ordering::SeqCst);
            true
        }
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            shared.dropped.fetch_add(1, Ordering::SeqCst);
            false
        }
    }
}

fn run_delivery(shared: Arc<Shared>, rx: Receiver<LogRecord>) {
    for record in rx {
        match shared.current_sink() {
            Some(sink) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&record)));
                if outcome.is_ok() {
                    shared.delivered.fetch_add(1, Ordering::SeqCst);
                } else {
                    shared.sink_faults.fetch_add(1, Ordering::SeqCst);
                }
            }
            None => {
                shared.unsinked.fetch_add(1, Ordering::SeqCst);
            }
        }
        shared.mark_settled();
    }
}
