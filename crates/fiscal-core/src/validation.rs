//! # Validation Module
//!
//! Checks a fiscalization command before any lock is taken.
//!
//! ## Why Validate Before Hashing?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The canonical form is one `key=value` per line. A software_id of      │
//! │  "POS-1\ndeveloper_id=X" would forge a line. Rejecting control         │
//! │  characters here keeps the canonical form unambiguous.                 │
//! │                                                                         │
//! │  Invalid input never reaches the device lock, so it cannot hold up     │
//! │  other sales on the same device.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Datelike, Utc};

use crate::error::ValidationError;
use crate::types::FiscalizeSaleCommand;
use crate::MAX_PROVENANCE_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Earliest invoice year accepted.
pub const MIN_INVOICE_YEAR: i32 = 1970;

/// Latest invoice year accepted (four-digit years keep the date format fixed-width).
pub const MAX_INVOICE_YEAR: i32 = 9999;

/// Validates every field of a fiscalization command.
///
/// ## Rules
/// - `sale_id`, `store_id` and `device_id` are not the nil UUID
/// - provenance fields pass [`validate_provenance_field`]
/// - `invoice_date` passes [`validate_invoice_date`]
///
/// Amounts are not range-checked: zero and negative (rectifying) invoices are
/// fiscal events too.
pub fn validate_command(command: &FiscalizeSaleCommand) -> ValidationResult<()> {
    if command.sale_id.is_nil() {
        return Err(required("sale_id"));
    }
    if command.store_id.is_nil() {
        return Err(required("store_id"));
    }
    if command.device_id.is_nil() {
        return Err(required("device_id"));
    }

    validate_provenance_field("software_id", &command.software_id)?;
    validate_provenance_field("software_version", &command.software_version)?;
    validate_provenance_field("developer_id", &command.developer_id)?;
    validate_invoice_date(&command.invoice_date)
}

/// Validates a provenance text field.
///
/// ## Rules
/// - Must not be empty or whitespace only
/// - At most [`MAX_PROVENANCE_LEN`] characters
/// - No control characters (including `\n`, `\r`, `\t`)
///
/// ## Example
/// ```rust
/// use fiscal_core::validation::validate_provenance_field;
///
/// assert!(validate_provenance_field("software_id", "POS-1").is_ok());
/// assert!(validate_provenance_field("software_id", "").is_err());
/// assert!(validate_provenance_field("software_id", "POS-1\nX").is_err());
/// ```
pub fn validate_provenance_field(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(required(field));
    }

    if value.chars().count() > MAX_PROVENANCE_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_PROVENANCE_LEN,
        });
    }

    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates the invoice date year range.
pub fn validate_invoice_date(date: &DateTime<Utc>) -> ValidationResult<()> {
    let year = date.year();
    if !(MIN_INVOICE_YEAR..=MAX_INVOICE_YEAR).contains(&year) {
        return Err(ValidationError::OutOfRange {
            field: "invoice_date".to_string(),
            min: MIN_INVOICE_YEAR as i64,
            max: MAX_INVOICE_YEAR as i64,
        });
    }
    Ok(())
}

fn required(field: &str) -> ValidationError {
    ValidationError::Required {
        field: field.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
