//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (fiscal-core port) ← Conflict / Unavailable / Corrupt /    │
//! │                                  UnreadableRecord                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  FiscalError ← ChainConflict is retryable, the rest is not            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use fiscal_core::StoreError;
use thiserror::Error;

/// SQLITE_BUSY primary result code.
const SQLITE_BUSY: i32 = 5;
/// SQLITE_LOCKED primary result code.
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Another writer committed the same (device_id, chain_sequence)
    /// - The sale is already in the log
    /// - Registering a device id twice
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// The device head changed between slot allocation and append.
    #[error("Device {device_id} head moved: expected sequence {expected}, got {attempted}")]
    HeadMoved {
        device_id: String,
        expected: u64,
        attempted: u64,
    },

    /// SQLite returned SQLITE_BUSY or SQLITE_LOCKED after the busy timeout.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Pool already closed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed, including trigger aborts.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored row does not decode into a valid record.
    #[error("Undecodable row: {0}")]
    Decode(String),

    /// A column of the fiscal record at `sequence` does not decode.
    #[error("Unreadable fiscal record at sequence {sequence}: {column}: {reason}")]
    UnreadableRecord {
        sequence: u64,
        column: String,
        reason: String,
    },

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a Decode error for a column.
    pub fn decode(column: &str, reason: impl std::fmt::Display) -> Self {
        DbError::Decode(format!("{column}: {reason}"))
    }

    /// True for errors where another writer won a race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DbError::UniqueViolation { .. }
                | DbError::HeadMoved { .. }
                | DbError::Busy(_)
                | DbError::PoolExhausted
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound     → DbError::NotFound
/// sqlx::Error::Database        → UNIQUE message    → UniqueViolation
///                                code BUSY/LOCKED  → Busy
///                                anything else     → QueryFailed
/// sqlx::Error::ColumnDecode    → DbError::Decode
/// sqlx::Error::PoolTimedOut    → DbError::PoolExhausted
/// Other                        → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>, ..."
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    return DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    };
                }

                // Extended result codes keep the primary code in the low byte.
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                    return DbError::Busy(msg.to_string());
                }

                DbError::QueryFailed(msg.to_string())
            }

            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Decode(format!("column {index}: {source}"))
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Classifies database errors for the storage ports.
impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            e if e.is_conflict() => StoreError::Conflict(e.to_string()),
            DbError::Decode(msg) => StoreError::Corrupt(msg),
            DbError::UnreadableRecord {
                sequence,
                column,
                reason,
            } => StoreError::UnreadableRecord {
                sequence,
                column,
                reason,
            },
            e => StoreError::Unavailable(e.to_string()),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================
