//! Error handling for the MTConnect core.
//!
//! This module defines the error type used throughout the ingest pipeline,
//! buffer, checkpoint, and asset store. All public APIs return
//! `Result<T, AgentError>` for consistent error handling.
//!
//! # Error Handling Pattern
//!
//! ```
//! use mtconnect_core::{AgentError, Result};
//!
//! fn safe_operation() -> Result<()> {
//!     // ... operations ...
//!     Ok(())
//! }
//! ```

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

/// Result type for MTConnect core operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Machine-readable error code surfaced to a requesting sink, per spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A requested sequence or count fell outside the buffer's retained range.
    OutOfRange,
    /// A query parameter was malformed or internally inconsistent.
    InvalidRequest,
    /// No asset exists with the requested id.
    AssetNotFound,
    /// No device matches the requested name or uuid.
    NoDevice,
    /// An xpath-style data item filter could not be parsed.
    InvalidXPath,
}

/// Errors that can occur while ingesting, storing, or querying observations.
///
/// A flat enum covering every failure mode from a malformed SHDR line to a
/// corrupted lock, so callers can match once and handle every case.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A raw adapter line, config fragment, or asset body could not be parsed.
    ///
    /// Per spec.md §7, a `ParseError` is logged at WARN and the offending
    /// line is dropped; ingest continues.
    #[error("parse error: {0}")]
    Parse(String),

    /// An observation's properties did not match its data item's
    /// category × representation contract (spec.md §4.2).
    #[error("invalid observation for data item {data_item}: {reason}")]
    InvalidObservation {
        /// The data item the observation targeted.
        data_item: String,
        /// Why the shape was rejected.
        reason: String,
    },

    /// A key in an SHDR line did not resolve to any known data item.
    #[error("unknown data item for key '{0}'")]
    UnknownDataItem(String),

    /// A query parameter (sequence, count, path) fell outside valid bounds
    /// or could not be satisfied.
    #[error("{code:?}: {message}")]
    Query {
        /// The structured error code (spec.md §7).
        code: ErrorCode,
        /// A human-readable message.
        message: String,
    },

    /// The device model failed to load or reload.
    ///
    /// At startup this is fatal to the agent; at reload time it is a
    /// warning and the old model is retained unchanged (spec.md §7).
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// An internal lock was poisoned by a panicking holder.
    #[error("internal lock poisoned: {0}")]
    Corruption(String),
}

impl AgentError {
    /// Builds a `Query` error with the `OUT_OF_RANGE` code.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        AgentError::Query {
            code: ErrorCode::OutOfRange,
            message: message.into(),
        }
    }

    /// Builds a `Query` error with the `INVALID_REQUEST` code.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AgentError::Query {
            code: ErrorCode::InvalidRequest,
            message: message.into(),
        }
    }

    /// Builds a `Query` error with the `ASSET_NOT_FOUND` code.
    pub fn asset_not_found(id: impl Into<String>) -> Self {
        AgentError::Query {
            code: ErrorCode::AssetNotFound,
            message: format!("asset '{}' not found", id.into()),
        }
    }

    /// Builds a `Query` error with the `NO_DEVICE` code.
    pub fn no_device(key: impl Into<String>) -> Self {
        AgentError::Query {
            code: ErrorCode::NoDevice,
            message: format!("no device matching '{}'", key.into()),
        }
    }

    /// Builds a `Query` error with the `INVALID_XPATH` code.
    pub fn invalid_xpath(path: impl Into<String>) -> Self {
        AgentError::Query {
            code: ErrorCode::InvalidXPath,
            message: format!("invalid path expression '{}'", path.into()),
        }
    }
}

/// Safely acquires a `parking_lot` mutex.
///
/// `parking_lot` mutexes do not poison on panic, so this never fails; it
/// exists to give every lock acquisition in the crate one call site and one
/// name.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
}
