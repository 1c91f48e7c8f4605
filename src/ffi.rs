//! C ABI for hosts that load the library dynamically.
//!
//! The exported functions drive a single process-wide [`RuntimeController`],
//! created on first use. Its configuration comes from the file named by
//! [`CONFIG_ENV_VAR`](crate::config::CONFIG_ENV_VAR), or from defaults.
//!
//! # Functions
//!
//! | Function | Returns |
//! |----------|---------|
//! | `arti_get_version()` | static NUL-terminated string, never freed by the caller |
//! | `arti_set_log_callback(cb)` | nothing; `NULL` clears the callback |
//! | `arti_initialize(data_dir)` | `0` or a negative [`Error`] code |
//! | `arti_start_socks_proxy(port)` | `0` or a negative [`Error`] code |
//! | `arti_stop()` | always `0` |
//!
//! No function unwinds into the caller. A panic inside the library is reported
//! as [`Error::Internal`] (`-9`).
//!
//! The callback runs on the library's `log-bridge` thread and receives one line
//! per record; the pointer is only valid for the duration of the call. The
//! prototypes are in `include/arti_embed.h`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::bridge::{LogBridge, LogRecord, LogSink};
use crate::config::{Config, LogLevel, CONFIG_ENV_VAR};
use crate::controller::{panic_message, RuntimeController};
use crate::engine::EngineFactory;
use crate::error::{status_of, Error, Result, STATUS_OK};
use crate::{logger, plog_fmt, version};

/// Host log callback: receives one NUL-terminated line per record.
pub type LogCallback = extern "C" fn(*const c_char);

/// Returns the process-wide controller used by the C ABI.
///
/// The first call loads configuration, installs the process logger with engine
/// forwarding, and starts the log bridge.
pub fn global() -> &'static RuntimeController {
    static CONTROLLER: OnceLock<RuntimeController> = OnceLock::new();
    CONTROLLER.get_or_init(|| {
        let (config, load_error) = match Config::from_env() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        };
        let bridge = LogBridge::new(config.log_queue_capacity);
        if let Err(e) = logger::init(&config, Some(bridge.clone())) {
            // Usually a host that installed its own subscriber first.
            plog_fmt!(LogLevel::Debug, "process logger not installed: {}", e);
        }
        if let Some(e) = load_error {
            plog_fmt!(
                LogLevel::Warn,
                "Ignoring configuration from {}: {}",
                CONFIG_ENV_VAR,
                e
            );
        }
        RuntimeController::with_bridge(default_factory(&config), bridge)
    })
}

#[cfg(feature = "arti")]
fn default_factory(config: &Config) -> impl EngineFactory {
    crate::arti::ArtiFactory::new(config)
}

#[cfg(not(feature = "arti"))]
fn default_factory(_config: &Config) -> impl EngineFactory {
    Unavailable
}

#[cfg(not(feature = "arti"))]
struct Unavailable;

#[cfg(not(feature = "arti"))]
impl EngineFactory for Unavailable {
    fn name(&self) -> &'static str {
        "none"
    }

    fn configure(
        &self,
        _data_dir: &std::path::Path,
        _logs: crate::bridge::LogEmitter,
    ) -> crate::engine::EngineResult<Box<dyn crate::engine::Engine>> {
        Err(crate::engine::EngineError::Config(
            "built without an engine backend".to_string(),
        ))
    }
}

/// Adapts a C function pointer to [`LogSink`].
struct CallbackSink(LogCallback);

impl LogSink for CallbackSink {
    fn deliver(&self, record: &LogRecord) {
        let bytes: Vec<u8> = record
            .render()
            .into_bytes()
            .into_iter()
            .filter(|b| *b != 0)
            .collect();
        if let Ok(line) = CString::new(bytes) {
            (self.0)(line.as_ptr());
        }
    }
}

fn guarded(operation: &str, f: impl FnOnce() -> Result<()>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => status_of(&result),
        Err(payload) => {
            let err = Error::Internal(format!(
                "{} panicked: {}",
                operation,
                panic_message(payload.as_ref())
            ));
            plog_fmt!(LogLevel::Error, "{}", err);
            err.status_code()
        }
    }
}

/// # Safety
///
/// `ptr` is null or a NUL-terminated string valid for the call.
unsafe fn path_arg(ptr: *const c_char) -> Result<PathBuf> {
    if ptr.is_null() {
        return Err(Error::invalid_path("", "data_dir is null"));
    }
    let raw = CStr::from_ptr(ptr);
    let path = raw.to_str().map_err(|_| {
        Error::invalid_path(raw.to_string_lossy().into_owned(), "data_dir is not UTF-8")
    })?;
    Ok(PathBuf::from(path))
}

/// Returns the library version as a static C string.
///
/// The string lives for the rest of the process and must not be freed.
#[no_mangle]
pub extern "C" fn arti_get_version() -> *const c_char {
    version::c_version().as_ptr()
}

/// Registers the log callback; `None` (a NULL pointer) clears it.
///
/// May be called in any phase, before `arti_initialize` included.
#[no_mangle]
pub extern "C" fn arti_set_log_callback(callback: Option<LogCallback>) {
    let _ = panic::catch_unwind(|| {
        let controller = global();
        match callback {
            Some(callback) => {
                controller.set_log_sink(Some(Arc::new(CallbackSink(callback))));
                controller
                    .bridge()
                    .emitter("ffi")
                    .info("Log callback registered");
            }
            None => controller.set_log_sink(None),
        }
    });
}

/// Creates and configures the engine with `data_dir`.
///
/// # Safety
///
/// `data_dir` must be null or a NUL-terminated string that stays valid for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn arti_initialize(data_dir: *const c_char) -> i32 {
    guarded("arti_initialize", || {
        // SAFETY: forwarded from this function's contract.
        let path = unsafe { path_arg(data_dir) }?;
        global().initialize(path)
    })
}

/// Starts the SOCKS proxy on `port`.
#[no_mangle]
pub extern "C" fn arti_start_socks_proxy(port: i32) -> i32 {
    guarded("arti_start_socks_proxy", || global().start_proxy(port))
}

/// Stops the proxy and the engine. Always returns 0.
#[no_mangle]
pub extern "C" fn arti_stop() -> i32 {
    let _ = guarded("arti_stop", || global().stop());
    STATUS_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    extern "C" fn record_line(line: *const c_char) {
        let line = unsafe { CStr::from_ptr(line) };
        LINES
            .lock()
            .unwrap()
            .push(line.to_string_lossy().into_owned());
    }

    #[test]
    fn test_version_is_static_c_string() {
        let ptr = arti_get_version();
        assert!(!ptr.is_null());
        assert_eq!(ptr, arti_get_version());
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap();
        assert_eq!(text, version::version());
    }

    #[test]
    fn test_callback_sink_renders_lines() {
        let bridge = LogBridge::new(8);
        bridge.set_sink(Some(Arc::new(CallbackSink(record_line))));
        bridge.emitter("t").info("plain line");
        bridge.emitter("t").error("with\0nul");
        assert!(bridge.flush(Duration::from_secs(5)));

        let lines = LINES.lock().unwrap();
        assert!(lines.contains(&"plain line".to_string()));
        assert!(lines.contains(&"ERROR: withnul".to_string()));
    }

    #[test]
    fn test_bad_paths_are_rejected() {
        let invalid = Error::invalid_path("", "").status_code();
        unsafe {
            assert_eq!(arti_initialize(std::ptr::null()), invalid);
            assert_eq!(arti_initialize(c"relative/dir".as_ptr()), invalid);
            assert_eq!(arti_initialize(c"".as_ptr()), invalid);
            assert_eq!(arti_initialize(b"/tmp/\xff\0".as_ptr().cast()), invalid);
        }
    }

    #[test]
    fn test_start_and_stop_without_engine() {
        assert_eq!(
            arti_start_socks_proxy(9050),
            Error::NotInitialized.status_code()
        );
        assert_eq!(arti_stop(), STATUS_OK);
        assert_eq!(arti_stop(), STATUS_OK);
    }

    #[test]
    fn test_set_and_clear_callback() {
        arti_set_log_callback(Some(record_line));
        assert!(global().bridge().has_sink());
        arti_set_log_callback(None);
        assert!(!global().bridge().has_sink());
    }

    #[test]
    fn test_guarded_maps_panics() {
        assert_eq!(guarded("ok", || Ok(())), STATUS_OK);
        assert_eq!(guarded("err", || Err(Error::AlreadyInitialized)), -3);
        assert_eq!(guarded("panic", || panic!("boom")), -9);
    }
}
