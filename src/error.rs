//! Error types for loading native libraries and bridging calls into them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ffi::CallId;

/// Failure to load a native library or resolve its entry points.
///
/// The process cannot proceed without the library, so callers are expected
/// to propagate this to exit rather than retry.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),

    #[error("Native library not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to load library '{}': {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("Symbol '{symbol}' not found in '{library}': {reason}")]
    MissingSymbol {
        library: String,
        symbol: &'static str,
        reason: String,
    },
}

/// Per-call failure returned to the immediate caller.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Failed to open encrypted database at '{path}'")]
    OpenFailed { path: String },

    #[error("SQL execution timeout: {call_id} did not complete within {after:?}")]
    Timeout { call_id: CallId, after: Duration },

    #[error("Invalid argument: {what} {reason}")]
    InvalidArgument {
        what: &'static str,
        reason: &'static str,
    },

    #[error("Completion for {call_id} was dropped before it settled")]
    Disconnected { call_id: CallId },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
