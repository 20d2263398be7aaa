//! Pluggable notification handlers
//!
//! Handlers emulate a function-as-a-service entry point. A handler is a
//! `cdylib` in the configured source directory exporting a function with the
//! C ABI below; it is addressed by a dotted `<module>.<function>` path and
//! re-resolved according to the configured reload policy, so edits to the
//! handler library take effect without restarting the bridge.

mod registry;

pub use registry::{HandlerRegistry, ReloadPolicy};

use std::os::raw::c_char;
use std::path::PathBuf;
use thiserror::Error;

/// C ABI every handler library must export.
///
/// Both arguments are NUL-terminated JSON documents (the invocation event
/// and the context). A zero return means success; anything else is treated
/// as a handler failure.
pub type RawHandler = unsafe extern "C" fn(event: *const c_char, context: *const c_char) -> i32;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid handler path {0:?}: expected <module>.<function>")]
    BadSpec(String),

    #[error("no handler module {module:?} in {dir} (tried {tried:?})")]
    ModuleMissing {
        module: String,
        dir: PathBuf,
        tried: Vec<PathBuf>,
    },

    #[error("failed to load handler module {path}: {source}")]
    ModuleLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("handler function {function:?} not found in {path}: {source}")]
    NotFound {
        function: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("handler {spec} returned non-zero status {code}")]
    Invocation { spec: String, code: i32 },

    #[error("handler input could not be encoded: {0}")]
    Encode(#[from] std::ffi::NulError),
}

/// A dotted `<module>.<function>` handler address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    pub module: String,
    pub function: String,
}

impl HandlerSpec {
    /// Split a dotted path into module and function identifiers.
    pub fn parse(dotted: &str) -> Result<Self, HandlerError> {
        let Some((module, function)) = dotted.split_once('.') else {
            return Err(HandlerError::BadSpec(dotted.to_string()));
        };
        if module.is_empty() || function.is_empty() || function.contains('.') {
            return Err(HandlerError::BadSpec(dotted.to_string()));
        }
        Ok(Self {
            module: module.to_string(),
            function: function.to_string(),
        })
    }
}

impl std::fmt::Display for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}

/// Which handler a notification is dispatched to.
///
/// `Dynamic` keeps the raw dotted path; it is parsed on every dispatch so a
/// misconfigured path surfaces per-request rather than at startup, matching
/// the lazy resolution of the handler library itself.
#[derive(Debug, Clone)]
pub enum HandlerKind {
    /// Built-in handler that logs the event and context and succeeds.
    Default,
    /// Handler loaded from a library in the source directory.
    Dynamic(String),
}
