//! # Fiscal Audit Log Repository
//!
//! The append-only per-device hash chain, implementing [`FiscalAuditLogStore`].
//!
//! ## Conditional Append
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  save(record)                                                           │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    INSERT record              ← first statement takes the write lock   │
//! │       │                         (waits up to busy_timeout)             │
//! │       ├── UNIQUE(device_id, chain_sequence) fails → Conflict           │
//! │       ├── UNIQUE(sale_id) fails                   → Conflict           │
//! │       ▼                                                                 │
//! │    SELECT previous head of the device (excluding the new row)          │
//! │       │                                                                 │
//! │       ├── head.seq + 1 != record.seq    → ROLLBACK, HeadMoved          │
//! │       ├── head.hash != previous_hash    → ROLLBACK, HeadMoved          │
//! │       ▼                                                                 │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transaction is a `sqlx::Transaction`, so a dropped future rolls back
//! instead of leaving the connection inside an open write transaction.

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Decode, Row, SqlitePool, Type};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use fiscal_core::hasher::format_instant;
use fiscal_core::{
    ChainHash, DeviceId, FiscalAuditLogStore, FiscalAuditRecord, Money, SaleId, StoreResult,
};

const RECORD_COLUMNS: &str = "id, sale_id, store_id, device_id, event_type, chain_sequence, \
     invoice_amount_cents, invoice_date, previous_hash, record_hash, \
     software_id, software_version, developer_id, created_at";

/// Decodes a `fiscal_audit_log` row.
///
/// `chain_sequence` is read first so that any other column that fails to
/// decode is reported as [`DbError::UnreadableRecord`] at that sequence.
fn decode_record(row: &SqliteRow) -> DbResult<FiscalAuditRecord> {
    let raw: i64 = row.try_get("chain_sequence")?;
    let sequence = u64::try_from(raw).map_err(|e| DbError::decode("chain_sequence", e))?;
    let columns = RowColumns { row, sequence };

    Ok(FiscalAuditRecord {
        fiscal_log_id: columns.parse("id")?,
        sale_id: columns.parse("sale_id")?,
        store_id: columns.parse("store_id")?,
        device_id: columns.parse("device_id")?,
        event_type: columns.parse("event_type")?,
        chain_sequence: sequence,
        invoice_amount: Money::from_cents(columns.get("invoice_amount_cents")?),
        invoice_date: columns.instant("invoice_date")?,
        previous_hash: columns.parse::<ChainHash>("previous_hash")?,
        record_hash: columns.parse::<ChainHash>("record_hash")?,
        software_id: columns.get("software_id")?,
        software_version: columns.get("software_version")?,
        developer_id: columns.get("developer_id")?,
        created_at: columns.get("created_at")?,
    })
}

/// Typed column access for one row, tagging failures with its sequence.
struct RowColumns<'r> {
    row: &'r SqliteRow,
    sequence: u64,
}

impl RowColumns<'_> {
    fn unreadable(&self, column: &str, reason: impl Display) -> DbError {
        DbError::UnreadableRecord {
            sequence: self.sequence,
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }

    fn get<T>(&self, column: &str) -> DbResult<T>
    where
        T: for<'a> Decode<'a, Sqlite> + Type<Sqlite>,
    {
        self.row
            .try_get(column)
            .map_err(|e| self.unreadable(column, e))
    }

    fn parse<T>(&self, column: &str) -> DbResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let text: String = self.get(column)?;
        text.parse().map_err(|e| self.unreadable(column, e))
    }

    fn instant(&self, column: &str) -> DbResult<DateTime<Utc>> {
        let text: String = self.get(column)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|date| date.with_timezone(&Utc))
            .map_err(|e| self.unreadable(column, e))
    }
}

fn sequence_param(sequence: u64) -> DbResult<i64> {
    i64::try_from(sequence)
        .map_err(|_| DbError::Internal(format!("chain_sequence {sequence} exceeds i64")))
}

/// Repository for the fiscal audit log.
#[derive(Debug, Clone)]
pub struct FiscalAuditLogRepository {
    pool: SqlitePool,
}

impl FiscalAuditLogRepository {
    /// Creates a new FiscalAuditLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        FiscalAuditLogRepository { pool }
    }

    /// Appends a record if, and only if, it extends the device head.
    pub async fn append(&self, record: &FiscalAuditRecord) -> DbResult<FiscalAuditRecord> {
        let sequence = sequence_param(record.chain_sequence)?;
        let device_id = record.device_id.to_string();
        let created_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fiscal_audit_log (
                id, sale_id, store_id, device_id, event_type, chain_sequence,
                invoice_amount_cents, invoice_date, previous_hash, record_hash,
                software_id, software_version, developer_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(record.fiscal_log_id.to_string())
        .bind(record.sale_id.to_string())
        .bind(record.store_id.to_string())
        .bind(&device_id)
        .bind(record.event_type.as_str())
        .bind(sequence)
        .bind(record.invoice_amount.cents())
        .bind(format_instant(&record.invoice_date))
        .bind(record.previous_hash.to_hex())
        .bind(record.record_hash.to_hex())
        .bind(&record.software_id)
        .bind(&record.software_version)
        .bind(&record.developer_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let head: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT chain_sequence, record_hash
            FROM fiscal_audit_log
            WHERE device_id = ?1 AND id <> ?2
            ORDER BY chain_sequence DESC
            LIMIT 1
            "#,
        )
        .bind(&device_id)
        .bind(record.fiscal_log_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let (expected, head_hash) = match head {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, ChainHash::GENESIS.to_hex()),
        };

        if expected != sequence || head_hash != record.previous_hash.to_hex() {
            warn!(
                device_id = %device_id,
                expected,
                attempted = record.chain_sequence,
                "Device head moved; rolling back append"
            );
            tx.rollback().await?;
            return Err(DbError::HeadMoved {
                device_id,
                expected: u64::try_from(expected).unwrap_or(0),
                attempted: record.chain_sequence,
            });
        }

        tx.commit().await?;

        info!(
            device_id = %device_id,
            sequence = record.chain_sequence,
            hash = %record.record_hash.short(),
            "Fiscal record committed"
        );

        Ok(FiscalAuditRecord {
            created_at,
            ..record.clone()
        })
    }

    /// Highest-sequence record for a device.
    pub async fn last_for_device(&self, device_id: DeviceId) -> DbResult<Option<FiscalAuditRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM fiscal_audit_log \
             WHERE device_id = ?1 ORDER BY chain_sequence DESC LIMIT 1"
        ))
        .bind(device_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_record).transpose()
    }

    /// Record for a sale, on any device.
    pub async fn for_sale(&self, sale_id: SaleId) -> DbResult<Option<FiscalAuditRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM fiscal_audit_log WHERE sale_id = ?1"
        ))
        .bind(sale_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_record).transpose()
    }

    /// A page of a device's records in ascending sequence order.
    pub async fn page_for_device(
        &self,
        device_id: DeviceId,
        offset: u64,
        limit: u32,
    ) -> DbResult<Vec<FiscalAuditRecord>> {
        debug!(device_id = %device_id, offset, limit, "Loading fiscal log page");

        let offset = i64::try_from(offset)
            .map_err(|_| DbError::Internal(format!("offset {offset} exceeds i64")))?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM fiscal_audit_log \
             WHERE device_id = ?1 ORDER BY chain_sequence ASC LIMIT ?2 OFFSET ?3"
        ))
        .bind(device_id.to_string())
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_record).collect()
    }

    /// Devices with at least one record, in id order.
    pub async fn devices(&self) -> DbResult<Vec<DeviceId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT device_id FROM fiscal_audit_log ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await?;

        ids.iter()
            .map(|id| id.parse().map_err(|e| DbError::decode("device_id", e)))
            .collect()
    }

    /// Number of records committed for a device.
    pub async fn count_for_device(&self, device_id: DeviceId) -> DbResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fiscal_audit_log WHERE device_id = ?1")
                .bind(device_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        u64::try_from(count).map_err(|e| DbError::decode("count", e))
    }
}

#[async_trait]
impl FiscalAuditLogStore for FiscalAuditLogRepository {
    async fn save(&self, record: FiscalAuditRecord) -> StoreResult<FiscalAuditRecord> {
        Ok(self.append(&record).await?)
    }

    async fn find_last_by_device(
        &self,
        device_id: DeviceId,
    ) -> StoreResult<Option<FiscalAuditRecord>> {
        Ok(self.last_for_device(device_id).await?)
    }

    async fn find_by_sale(&self, sale_id: SaleId) -> StoreResult<Option<FiscalAuditRecord>> {
        Ok(self.for_sale(sale_id).await?)
    }

    async fn list_by_device(
        &self,
        device_id: DeviceId,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<FiscalAuditRecord>> {
        Ok(self.page_for_device(device_id, offset, limit).await?)
    }

    async fn list_devices(&self) -> StoreResult<Vec<DeviceId>> {
        Ok(self.devices().await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
