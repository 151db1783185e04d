//! # Ports
//!
//! Storage and device lookup seen from the fiscal chain.
//!
//! ```text
//! fiscal-chain ──uses──► FiscalAuditLogStore ◄──implements── fiscal-db (SQLite)
//!              ──uses──► DeviceDirectory     ◄──implements── fiscal-db (devices table)
//! ```
//!
//! The traits are object safe (`Arc<dyn FiscalAuditLogStore>`) so the service can
//! be tested against in-memory doubles.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{DeviceContext, DeviceId, FiscalAuditRecord, SaleId};

/// Append-only persistence for committed fiscal records.
#[async_trait]
pub trait FiscalAuditLogStore: Send + Sync {
    /// Appends a record atomically and returns it as committed.
    ///
    /// The append is conditional: it must fail with `StoreError::Conflict`
    /// unless `record.chain_sequence` is the device head plus one (1 for an
    /// empty chain) and `record.previous_hash` is the head's record hash
    /// (GENESIS for an empty chain). A duplicate sale is also a conflict.
    async fn save(&self, record: FiscalAuditRecord) -> StoreResult<FiscalAuditRecord>;

    /// Record with the highest sequence for the device.
    async fn find_last_by_device(&self, device_id: DeviceId)
        -> StoreResult<Option<FiscalAuditRecord>>;

    /// Sequence the next record for this device must carry.
    ///
    /// Defined in terms of [`find_last_by_device`](Self::find_last_by_device);
    /// implementations should not override it.
    async fn get_next_sequence_for_device(&self, device_id: DeviceId) -> StoreResult<u64> {
        Ok(self
            .find_last_by_device(device_id)
            .await?
            .map_or(1, |last| last.chain_sequence + 1))
    }

    /// Committed record for a sale, on any device.
    async fn find_by_sale(&self, sale_id: SaleId) -> StoreResult<Option<FiscalAuditRecord>>;

    /// A page of the device's records in ascending sequence order.
    async fn list_by_device(
        &self,
        device_id: DeviceId,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<FiscalAuditRecord>>;

    /// Devices with at least one committed record.
    async fn list_devices(&self) -> StoreResult<Vec<DeviceId>>;
}

/// Lookup of device registrations.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn resolve(&self, device_id: DeviceId) -> StoreResult<Option<DeviceContext>>;
}

// =============================================================================
// Unit Tests
// =============================================================================
