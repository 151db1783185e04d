//! # Error Types
//!
//! Error taxonomy for the fiscal audit chain.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fiscal-core errors (this file)                                        │
//! │  ├── FiscalError      - What callers of the service see                │
//! │  ├── ValidationError  - Malformed command fields                       │
//! │  └── StoreError       - What a storage port reports                    │
//! │                                                                         │
//! │  fiscal-db errors (separate crate)                                     │
//! │  └── DbError          - SQLite failures, mapped into StoreError        │
//! │                                                                         │
//! │  Flow: DbError → StoreError → FiscalError → CLI exit status            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only [`FiscalError::ChainConflict`] is safe to retry. A retry must repeat the
//! whole fiscalization call so that the sequence and previous hash are re-read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::ChainBreak;
use crate::types::{DeviceId, SaleId};

// =============================================================================
// Fiscal Error
// =============================================================================

/// Errors surfaced by fiscalization and chain verification.
#[derive(Debug, Error)]
pub enum FiscalError {
    /// The command failed validation before any lock was taken.
    #[error("Invalid fiscalization command: {0}")]
    InvalidCommand(#[from] ValidationError),

    /// The device is not registered, not active, or belongs to another store.
    ///
    /// Fatal for this command; retrying will not help.
    #[error("Unknown device {device_id}: {reason}")]
    UnknownDevice { device_id: DeviceId, reason: String },

    /// The device chain could not be extended right now.
    ///
    /// ## When This Occurs
    /// - The per-device lock was not acquired within the configured timeout
    /// - The store saw a different head than the one the slot was built from
    /// - SQLite reported a unique violation or a busy/locked database
    ///
    /// No sequence number is consumed. Retry the whole call.
    #[error("Chain conflict on device {device_id}: {reason}")]
    ChainConflict { device_id: DeviceId, reason: String },

    /// Persistence is unreachable or returned something unusable.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// The sale is already part of another device's chain.
    #[error("Sale {sale_id} is already fiscalized on device {device_id}")]
    SaleAlreadyFiscalized { sale_id: SaleId, device_id: DeviceId },

    /// A committed chain failed verification.
    #[error("Chain integrity violation on device {device_id} at sequence {sequence}: {reason}")]
    ChainIntegrityViolation {
        device_id: DeviceId,
        sequence: u64,
        reason: ChainBreak,
    },
}

impl FiscalError {
    /// Returns true when repeating the whole call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FiscalError::ChainConflict { .. })
    }

    /// Maps a storage port error into the taxonomy for a given device.
    ///
    /// `Conflict` becomes [`FiscalError::ChainConflict`]; `Unavailable` and
    /// `Corrupt` become [`FiscalError::StorageFailure`].
    pub fn from_store(device_id: DeviceId, err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reason) => FiscalError::ChainConflict { device_id, reason },
            StoreError::Unavailable(msg) => FiscalError::StorageFailure(msg),
            StoreError::Corrupt(msg) => {
                FiscalError::StorageFailure(format!("corrupt record: {msg}"))
            }
            err @ StoreError::UnreadableRecord { .. } => FiscalError::StorageFailure(err.to_string()),
        }
    }
}

/// Convenience type alias for Results with FiscalError.
pub type FiscalResult<T> = Result<T, FiscalError>;

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors for a fiscalization command.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// A required field is missing, empty or nil.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (control characters, malformed amount, bad uuid).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Store Error
// =============================================================================

/// Errors reported by the storage ports.
///
/// Adapters translate their native errors into these three classes so the
/// service can decide between retry and failure without knowing the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The append lost a race: head moved, unique violation, busy database.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend could not be reached or the operation failed outright.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be turned back into a record.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// A committed record exists at `sequence` but one of its columns does
    /// not decode (altered hash text, unparseable date).
    ///
    /// Verification treats this as a chain break at that sequence.
    #[error("unreadable record at sequence {sequence}: {column}: {reason}")]
    UnreadableRecord {
        sequence: u64,
        column: String,
        reason: String,
    },
}

/// Convenience type alias for Results with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
