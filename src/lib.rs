//! # onion-embed
//!
//! Embed an Arti onion-routing client in a host application and expose it as a
//! local SOCKS proxy, driven from Rust or through a small C ABI.
//!
//! # Overview
//!
//! The crate is a control plane. It does not route traffic itself; it owns the
//! lifecycle of an embedded engine and makes that lifecycle safe to drive from
//! arbitrary host threads:
//!
//! - **Lifecycle** ([`controller`]): `initialize` → `start_proxy` → `stop`, serialized by one gate
//! - **Log bridging** ([`bridge`]): engine records delivered to a host callback on a dedicated thread
//! - **Engine seam** ([`engine`]): capability traits, implemented by Arti ([`arti`]) and a test fake
//! - **C ABI** ([`ffi`]): `arti_initialize`, `arti_start_socks_proxy`, `arti_stop` and friends
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`controller`] | [`RuntimeController`] and the lifecycle state machine |
//! | [`engine`] | [`Engine`] / [`EngineFactory`] traits, [`ListenerHandle`] |
//! | [`bridge`] | [`LogBridge`], [`LogRecord`], [`LogSink`], host marker lines |
//! | [`arti`] | Production engine on `arti-client` (feature `arti`) |
//! | [`socks`] | SOCKS5 CONNECT front-end used by the Arti engine |
//! | [`ffi`] | C ABI over a process-wide controller |
//! | [`config`] | Configuration management (TOML, CLI, environment) |
//! | [`error`] | Error types, status codes and [`Result`] alias |
//! | [`logger`] | Logging infrastructure using tracing |
//! | [`version`] | Build descriptor and static version string |
//!
//! # What This Library Does NOT Do
//!
//! - **Onion routing**: circuits, directories and relays are Arti's business
//! - **Packaging**: building XCFrameworks or JNI wrappers is left to the host build
//! - **Host behavior**: UI and reconnection policy belong to the application
//!
//! # Quick Start
//!
//! ## As a Library
//!
//! ```rust,no_run
//! # #[cfg(feature = "arti")]
//! # fn main() -> onion_embed::Result<()> {
//! use std::sync::Arc;
//! use onion_embed::{arti::ArtiFactory, Config, LogRecord, RuntimeController};
//!
//! let config = Config::default();
//! let controller = RuntimeController::with_config(ArtiFactory::new(&config), &config);
//! controller.set_log_sink(Some(Arc::new(|record: &LogRecord| {
//!     println!("{}", record.render());
//! })));
//!
//! controller.initialize("/var/lib/myapp/tor")?;
//! controller.start_proxy(9050)?;
//! // ... route traffic through socks5://127.0.0.1:9050 ...
//! controller.stop()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "arti"))]
//! # fn main() {}
//! ```
//!
//! ## From C
//!
//! ```c
//! #include "arti_embed.h"
//!
//! static void on_log(const char *line) { puts(line); }
//!
//! int main(void) {
//!     arti_set_log_callback(on_log);
//!     if (arti_initialize("/var/lib/myapp/tor") != 0) return 1;
//!     if (arti_start_socks_proxy(9050) != 0) return 1;
//!     /* ... */
//!     return arti_stop();
//! }
//! ```
//!
//! ## As a CLI Application
//!
//! ```bash
//! onion-embed --data-dir /var/lib/onion-embed --port 9050
//! onion-embed --generate_config onion-embed.toml
//! ```
//!
//! # Status Codes
//!
//! Every lifecycle operation reports `0` or a stable negative code; see
//! [`error`] for the table. Failed operations never change the phase, and
//! `stop` always succeeds.
//!
//! # See Also
//!
//! - [Arti](https://gitlab.torproject.org/tpo/core/arti) - The embedded onion-routing engine
//! - [RFC 1928](https://www.rfc-editor.org/rfc/rfc1928) - SOCKS Protocol Version 5

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

#[cfg(feature = "arti")]
pub mod arti;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logger;
pub mod socks;
pub mod version;

pub use bridge::{markers, BridgeStats, LogBridge, LogEmitter, LogRecord, LogSink};
pub use config::{CliArgs, Config, LogLevel};
pub use controller::{Phase, RuntimeController};
pub use engine::{Engine, EngineError, EngineFactory, ListenerHandle};
pub use error::{Error, Result, STATUS_OK};
pub use version::{build_info, BuildInfo};
