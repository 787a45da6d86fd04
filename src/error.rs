//! SDK error types, error codes, and last-error storage for the C API.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────────────

pub const SUCCESS: i32 = 0;
pub const ERROR_INVALID_PARAM: i32 = -1;
pub const ERROR_NOT_INITIALIZED: i32 = -2;
pub const ERROR_INTERNAL: i32 = -5;
pub const ERROR_NETWORK: i32 = -7;
pub const ERROR_PARSE: i32 = -8;
pub const ERROR_EMPTY_LIST: i32 = -9;
pub const ERROR_STORAGE: i32 = -11;

// ── SdkError enum ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server returned an empty {0} list")]
    EmptyList(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SdkError {
    /// Map this error to its integer error code for the C API.
    pub fn code(&self) -> i32 {
        match self {
            SdkError::Network(_) => ERROR_NETWORK,
            SdkError::Parse(_) => ERROR_PARSE,
            SdkError::EmptyList(_) => ERROR_EMPTY_LIST,
            SdkError::InvalidParam(_) => ERROR_INVALID_PARAM,
            SdkError::NotInitialized => ERROR_NOT_INITIALIZED,
            SdkError::Storage(_) => ERROR_STORAGE,
            SdkError::Internal(_) => ERROR_INTERNAL,
        }
    }

    /// Whether a list fetch that failed this way is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SdkError::Network(_) | SdkError::Parse(_) | SdkError::EmptyList(_)
        )
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        SdkError::Parse(e.to_string())
    }
}

// ── Last-error storage ──────────────────────────────────────────────────────

static LAST_ERROR: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Serializes tests that touch the global error or SDK state.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
static LAST_ERROR_CODE: Lazy<Mutex<i32>> = Lazy::new(|| Mutex::new(SUCCESS));

/// Store an `SdkError`, recording both the message and code.
pub fn set_sdk_error(err: &SdkError) {
    *LAST_ERROR_CODE.lock() = err.code();
    *LAST_ERROR.lock() = Some(err.to_string());
}

/// Clear the stored error.
pub fn clear_error() {
    *LAST_ERROR.lock() = None;
    *LAST_ERROR_CODE.lock() = SUCCESS;
}

/// Take the last error message, leaving `None` behind.
pub fn take_last_error() -> Option<String> {
    LAST_ERROR.lock().take()
}

/// Return the last error code without clearing it.
pub fn last_error_code() -> i32 {
    *LAST_ERROR_CODE.lock()
}
