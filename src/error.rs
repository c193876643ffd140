//! Error kinds and per-call failure behavior (§7).

use thiserror::Error;

/// Every fallible operation in this crate returns one of these kinds.
#[derive(Debug, Error)]
pub enum MedError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("overflow: {0}")]
    Overflow(String),
}

pub type Result<T> = std::result::Result<T, MedError>;

/// Behavior-on-fail flags threaded through primitive operations (§7).
///
/// Most of this crate's public API simply returns `Result`; this flag set
/// exists for the few call sites — advisory-lock acquisition, ENOENT retry
/// during create — where the spec calls for a specific retry/suppress
/// policy rather than a bare propagate-or-not choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behavior {
    pub retry_once: bool,
    pub suppress_error_output: bool,
    pub suppress_warning_output: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            retry_once: false,
            suppress_error_output: false,
            suppress_warning_output: false,
        }
    }
}

impl Behavior {
    pub const RETURN_ON_FAIL: Behavior = Behavior {
        retry_once: false,
        suppress_error_output: false,
        suppress_warning_output: false,
    };

    pub const RETRY_ONCE: Behavior = Behavior {
        retry_once: true,
        suppress_error_output: false,
        suppress_warning_output: false,
    };
}
