//! # Record Hasher
//!
//! Canonical form v1 and the SHA-256 link between consecutive records.
//!
//! ## Canonical Form v1
//! ```text
//! fiscal-record/v1\n
//! chain_sequence=2\n
//! device_id=00000000-0000-0000-0000-000000000001\n
//! store_id=00000000-0000-0000-0000-000000000002\n
//! sale_id=00000000-0000-0000-0000-000000000003\n
//! event_type=ISSUE\n
//! invoice_amount=19.99\n
//! invoice_date=2024-01-01T10:00:00.000Z\n
//! software_id=POS-1\n
//! software_version=1.0.0\n
//! developer_id=B00000000\n
//! ```
//!
//! `record_hash = lowercase_hex(SHA-256(canonical_bytes || previous_hash_hex))`
//!
//! Identity (`fiscal_log_id`) and commit time (`created_at`) are not part of the
//! hashed content. Text fields are validated to be free of control characters
//! before they get here, so a field can never forge a line of its own.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::money::Money;
use crate::types::{ChainHash, DeviceId, FiscalEventType, SaleId, StoreId};
use crate::CANONICAL_VERSION;

/// Hashed fields of a record, borrowed from a pending or committed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalRecord<'a> {
    pub chain_sequence: u64,
    pub device_id: DeviceId,
    pub store_id: StoreId,
    pub sale_id: SaleId,
    pub event_type: FiscalEventType,
    pub invoice_amount: Money,
    pub invoice_date: DateTime<Utc>,
    pub software_id: &'a str,
    pub software_version: &'a str,
    pub developer_id: &'a str,
}

/// Renders an instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Sub-millisecond digits are dropped, not rounded.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Canonical UTF-8 bytes of a record.
pub fn canonical_bytes(record: &CanonicalRecord<'_>) -> Vec<u8> {
    let text = format!(
        "{CANONICAL_VERSION}\n\
         chain_sequence={}\n\
         device_id={}\n\
         store_id={}\n\
         sale_id={}\n\
         event_type={}\n\
         invoice_amount={}\n\
         invoice_date={}\n\
         software_id={}\n\
         software_version={}\n\
         developer_id={}\n",
        record.chain_sequence,
        record.device_id,
        record.store_id,
        record.sale_id,
        record.event_type,
        record.invoice_amount,
        format_instant(&record.invoice_date),
        record.software_id,
        record.software_version,
        record.developer_id,
    );
    text.into_bytes()
}

/// Computes `H(canonical(record) || previous_hash)`.
///
/// Pure and deterministic: the same fields and previous hash always give the
/// same digest.
pub fn compute_hash(record: &CanonicalRecord<'_>, previous_hash: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(record));
    hasher.update(previous_hash.to_hex().as_bytes());
    ChainHash::from_digest(hasher.finalize().into())
}

// =============================================================================
// Unit Tests
// =============================================================================
