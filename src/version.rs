//! Build and version descriptor.
//!
//! The version query is stateless and never fails. At the C ABI the string is a
//! NUL-terminated static that lives for the rest of the process; callers must not
//! free it.

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::OnceLock;

/// Describes this build of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    /// Crate name.
    pub name: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Engine backend compiled in.
    pub engine: &'static str,
    /// TLS provider used by the engine.
    pub tls: &'static str,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} engine, {})",
            self.name, self.version, self.engine, self.tls
        )
    }
}

/// Returns the descriptor for this build.
pub const fn build_info() -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        engine: if cfg!(feature = "arti") { "arti" } else { "none" },
        tls: if cfg!(feature = "arti") { "rustls" } else { "no tls" },
    }
}

/// Returns the rendered version string.
///
/// # Example
///
/// ```rust
/// let version = onion_embed::version::version();
/// assert!(version.starts_with("onion-embed "));
/// ```
pub fn version() -> &'static str {
    rendered().to_str().unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Returns the version as a process-lifetime C string.
pub fn c_version() -> &'static CStr {
    rendered().as_c_str()
}

fn rendered() -> &'static CString {
    static VERSION: OnceLock<CString> = OnceLock::new();
    VERSION.get_or_init(|| {
        let text = build_info().to_string().replace('\0', "");
        CString::new(text).unwrap_or_default()
    })
}
