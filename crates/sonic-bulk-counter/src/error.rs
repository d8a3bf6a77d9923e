//! Bulk counter status codes and error handling.
//!
//! Every engine entry point returns a [`BulkCounterResult`]. The error kinds
//! mirror the status codes an SDK client sees, so callers can decide between
//! retrying (`ResourceInUse`, `PartiallyComplete`) and fixing the call.

use std::fmt;
use thiserror::Error;

/// Status codes reported by the bulk counter engine.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkCounterStatus {
    Success = 0,
    GeneralError = 1,
    InvalidHandle = 5,
    NoMemory = 8,
    CmdUnsupported = 13,
    ParamNull = 15,
    ParamError = 16,
    ResourceInUse = 26,
    PartiallyComplete = 33,
}

impl BulkCounterStatus {
    /// Creates a status from a raw value. Unknown values map to `GeneralError`.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => BulkCounterStatus::Success,
            5 => BulkCounterStatus::InvalidHandle,
            8 => BulkCounterStatus::NoMemory,
            13 => BulkCounterStatus::CmdUnsupported,
            15 => BulkCounterStatus::ParamNull,
            16 => BulkCounterStatus::ParamError,
            26 => BulkCounterStatus::ResourceInUse,
            33 => BulkCounterStatus::PartiallyComplete,
            _ => BulkCounterStatus::GeneralError,
        }
    }

    /// Returns the raw status value.
    pub const fn as_raw(&self) -> i32 {
        *self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == BulkCounterStatus::Success
    }

    /// Returns true if the status indicates an error.
    pub fn is_error(&self) -> bool {
        *self != BulkCounterStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> BulkCounterResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(BulkCounterError::from_status(self))
        }
    }
}

impl fmt::Display for BulkCounterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BulkCounterStatus::Success => "BULK_CNTR_STATUS_SUCCESS",
            BulkCounterStatus::GeneralError => "BULK_CNTR_STATUS_ERROR",
            BulkCounterStatus::InvalidHandle => "BULK_CNTR_STATUS_INVALID_HANDLE",
            BulkCounterStatus::NoMemory => "BULK_CNTR_STATUS_NO_MEMORY",
            BulkCounterStatus::CmdUnsupported => "BULK_CNTR_STATUS_CMD_UNSUPPORTED",
            BulkCounterStatus::ParamNull => "BULK_CNTR_STATUS_PARAM_NULL",
            BulkCounterStatus::ParamError => "BULK_CNTR_STATUS_PARAM_ERROR",
            BulkCounterStatus::ResourceInUse => "BULK_CNTR_STATUS_RESOURCE_IN_USE",
            BulkCounterStatus::PartiallyComplete => "BULK_CNTR_STATUS_PARTIALLY_COMPLETE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for bulk counter operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkCounterError {
    /// Null, uninitialized or stale buffer handle.
    #[error("Invalid handle: {message}")]
    InvalidHandle { message: String },

    /// A required argument was missing.
    #[error("Missing parameter: {message}")]
    ParamNull { message: String },

    /// Malformed key, read key or op combination.
    #[error("Invalid parameter: {message}")]
    ParamError { message: String },

    /// The operation is not valid for this call or key type.
    #[error("Command unsupported: {message}")]
    CmdUnsupported { message: String },

    /// Buffer allocation failed.
    #[error("Out of memory: {message}")]
    NoMemory { message: String },

    /// Concurrency budget exhausted, buffer busy, or refresh outstanding.
    #[error("Resource in use: {message}")]
    ResourceInUse { message: String },

    /// The buffer's transaction has not signaled completion yet.
    #[error("Transaction not complete: {message}")]
    PartiallyComplete { message: String },

    /// Internal failure.
    #[error("General error: {message}")]
    General { message: String },
}

impl BulkCounterError {
    /// Creates an error from a status code.
    pub fn from_status(status: BulkCounterStatus) -> Self {
        let message = format!("status {}", status);
        match status {
            BulkCounterStatus::Success => BulkCounterError::General {
                message: "from_status called with success status".to_string(),
            },
            BulkCounterStatus::GeneralError => BulkCounterError::General { message },
            BulkCounterStatus::InvalidHandle => BulkCounterError::InvalidHandle { message },
            BulkCounterStatus::NoMemory => BulkCounterError::NoMemory { message },
            BulkCounterStatus::CmdUnsupported => BulkCounterError::CmdUnsupported { message },
            BulkCounterStatus::ParamNull => BulkCounterError::ParamNull { message },
            BulkCounterStatus::ParamError => BulkCounterError::ParamError { message },
            BulkCounterStatus::ResourceInUse => BulkCounterError::ResourceInUse { message },
            BulkCounterStatus::PartiallyComplete => {
                BulkCounterError::PartiallyComplete { message }
            }
        }
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        BulkCounterError::InvalidHandle {
            message: message.into(),
        }
    }

    pub fn param_null(message: impl Into<String>) -> Self {
        BulkCounterError::ParamNull {
            message: message.into(),
        }
    }

    pub fn param_error(message: impl Into<String>) -> Self {
        BulkCounterError::ParamError {
            message: message.into(),
        }
    }

    pub fn cmd_unsupported(message: impl Into<String>) -> Self {
        BulkCounterError::CmdUnsupported {
            message: message.into(),
        }
    }

    pub fn no_memory(message: impl Into<String>) -> Self {
        BulkCounterError::NoMemory {
            message: message.into(),
        }
    }

    pub fn resource_in_use(message: impl Into<String>) -> Self {
        BulkCounterError::ResourceInUse {
            message: message.into(),
        }
    }

    pub fn partially_complete(message: impl Into<String>) -> Self {
        BulkCounterError::PartiallyComplete {
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        BulkCounterError::General {
            message: message.into(),
        }
    }

    /// Returns the status code for this error.
    pub fn status(&self) -> BulkCounterStatus {
        match self {
            BulkCounterError::InvalidHandle { .. } => BulkCounterStatus::InvalidHandle,
            BulkCounterError::ParamNull { .. } => BulkCounterStatus::ParamNull,
            BulkCounterError::ParamError { .. } => BulkCounterStatus::ParamError,
            BulkCounterError::CmdUnsupported { .. } => BulkCounterStatus::CmdUnsupported,
            BulkCounterError::NoMemory { .. } => BulkCounterStatus::NoMemory,
            BulkCounterError::ResourceInUse { .. } => BulkCounterStatus::ResourceInUse,
            BulkCounterError::PartiallyComplete { .. } => BulkCounterStatus::PartiallyComplete,
            BulkCounterError::General { .. } => BulkCounterStatus::GeneralError,
        }
    }

    /// Returns true if the caller should retry after observing a state
    /// change (a freed slot or a completion event).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BulkCounterError::ResourceInUse { .. } | BulkCounterError::PartiallyComplete { .. }
        )
    }
}

/// Result type for bulk counter operations.
pub type BulkCounterResult<T> = Result<T, BulkCounterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(BulkCounterStatus::Success.is_success());
        assert!(!BulkCounterStatus::Success.is_error());
        assert!(BulkCounterStatus::Success.into_result().is_ok());
    }

    #[test]
    fn test_status_failure() {
        assert!(BulkCounterStatus::ResourceInUse.is_error());
        assert!(BulkCounterStatus::ResourceInUse.into_result().is_err());
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(BulkCounterStatus::from_raw(0), BulkCounterStatus::Success);
        assert_eq!(BulkCounterStatus::from_raw(26), BulkCounterStatus::ResourceInUse);
        assert_eq!(BulkCounterStatus::from_raw(-999), BulkCounterStatus::GeneralError);
        assert_eq!(BulkCounterStatus::PartiallyComplete.as_raw(), 33);
    }

    #[test]
    fn test_error_status_roundtrip() {
        for status in [
            BulkCounterStatus::GeneralError,
            BulkCounterStatus::InvalidHandle,
            BulkCounterStatus::NoMemory,
            BulkCounterStatus::CmdUnsupported,
            BulkCounterStatus::ParamNull,
            BulkCounterStatus::ParamError,
            BulkCounterStatus::ResourceInUse,
            BulkCounterStatus::PartiallyComplete,
        ] {
            assert_eq!(BulkCounterError::from_status(status).status(), status);
        }
    }

    #[test]
    fn test_error_retryable() {
        assert!(BulkCounterError::resource_in_use("slots").is_retryable());
        assert!(BulkCounterError::partially_complete("running").is_retryable());
        assert!(!BulkCounterError::param_error("bad key").is_retryable());
        assert!(!BulkCounterError::no_memory("pool").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = BulkCounterError::cmd_unsupported("flush on port key");
        assert_eq!(err.to_string(), "Command unsupported: flush on port key");
        assert_eq!(
            BulkCounterStatus::InvalidHandle.to_string(),
            "BULK_CNTR_STATUS_INVALID_HANDLE"
        );
    }
}
