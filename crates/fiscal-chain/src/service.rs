//! # Fiscalization Service
//!
//! Turns a completed sale into the next record of its device's chain.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  execute(command)                                                       │
//! │     │                                                                   │
//! │     ├── 1. validate ──────────────────────────► InvalidCommand          │
//! │     ├── 2. resolve device (active, same store) ► UnknownDevice          │
//! │     ├── 3. allocate_next(device) ─────────────► ChainConflict (timeout) │
//! │     │        ┌────────── device lock held ─────────────┐               │
//! │     ├── 4. sale already fiscalized?                     │               │
//! │     │        same device  → return stored result        │               │
//! │     │        other device → SaleAlreadyFiscalized       │               │
//! │     ├── 5. build record, hash(canonical ‖ previous)     │               │
//! │     ├── 6. commit ──────────────────────► ChainConflict (store race)    │
//! │     │        └──────────────────────────────────────────┘               │
//! │     ▼                                                                   │
//! │  FiscalizeSaleResult { fiscal_log_id, record_hash, chain_sequence }    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure leaves the chain unchanged. Only `ChainConflict` is worth
//! retrying, and the retry must be a fresh `execute`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fiscal_core::validation::validate_command;
use fiscal_core::{
    DeviceDirectory, DeviceStatus, FiscalAuditLogStore, FiscalAuditRecord, FiscalError,
    FiscalResult, FiscalizeSaleCommand, FiscalizeSaleResult, PendingRecord,
};

use crate::sequencer::ChainSequencer;

/// Fiscalizes sales against a store and a device directory.
#[derive(Clone)]
pub struct FiscalizationService {
    store: Arc<dyn FiscalAuditLogStore>,
    devices: Arc<dyn DeviceDirectory>,
    sequencer: ChainSequencer,
}

impl FiscalizationService {
    pub fn new(
        store: Arc<dyn FiscalAuditLogStore>,
        devices: Arc<dyn DeviceDirectory>,
        lock_timeout: Duration,
    ) -> Self {
        let sequencer = ChainSequencer::new(store.clone(), lock_timeout);
        Self {
            store,
            devices,
            sequencer,
        }
    }

    /// The sequencer guarding this service's device chains.
    pub fn sequencer(&self) -> &ChainSequencer {
        &self.sequencer
    }

    /// Appends the sale to its device's chain and returns where it landed.
    ///
    /// Calling again for a sale already on the same device returns the
    /// stored result without writing.
    pub async fn execute(&self, command: FiscalizeSaleCommand) -> FiscalResult<FiscalizeSaleResult> {
        validate_command(&command)?;

        debug!(
            sale_id = %command.sale_id,
            device_id = %command.device_id,
            amount = %command.invoice_amount,
            "Fiscalizing sale"
        );

        self.check_device(&command).await?;

        let slot = self.sequencer.allocate_next(command.device_id).await?;

        let existing = self
            .store
            .find_by_sale(command.sale_id)
            .await
            .map_err(|e| FiscalError::from_store(command.device_id, e))?;
        if let Some(existing) = existing {
            return replay(&command, existing);
        }

        let record =
            PendingRecord::from_command(&command, slot.sequence_number(), *slot.previous_hash())
                .seal();
        let committed = slot.commit(record).await?;

        info!(
            sale_id = %committed.sale_id,
            device_id = %committed.device_id,
            sequence = committed.chain_sequence,
            hash = %committed.record_hash.short(),
            "Sale fiscalized"
        );

        Ok(committed.result())
    }

    /// Rejects devices that are unregistered, not active or in another store.
    async fn check_device(&self, command: &FiscalizeSaleCommand) -> FiscalResult<()> {
        let device_id = command.device_id;
        let context = self
            .devices
            .resolve(device_id)
            .await
            .map_err(|e| FiscalError::StorageFailure(format!("device directory: {e}")))?;

        let reason = match context {
            None => "device is not registered".to_string(),
            Some(ctx) if ctx.status != DeviceStatus::Active => {
                format!("device is {}", ctx.status)
            }
            Some(ctx) if ctx.store_id != command.store_id => {
                format!("device belongs to store {}, not {}", ctx.store_id, command.store_id)
            }
            Some(_) => return Ok(()),
        };

        warn!(device_id = %device_id, reason = %reason, "Rejected fiscalization");
        Err(FiscalError::UnknownDevice { device_id, reason })
    }
}

/// Answers a repeated sale from the record already in the log.
fn replay(
    command: &FiscalizeSaleCommand,
    existing: FiscalAuditRecord,
) -> FiscalResult<FiscalizeSaleResult> {
    if existing.device_id != command.device_id {
        warn!(
            sale_id = %command.sale_id,
            device_id = %command.device_id,
            owner = %existing.device_id,
            "Sale already fiscalized on another device"
        );
        return Err(FiscalError::SaleAlreadyFiscalized {
            sale_id: command.sale_id,
            device_id: existing.device_id,
        });
    }

    if existing.invoice_amount != command.invoice_amount {
        warn!(
            sale_id = %command.sale_id,
            stored = %existing.invoice_amount,
            requested = %command.invoice_amount,
            "Repeated sale differs from stored record; returning stored result"
        );
    } else {
        debug!(sale_id = %command.sale_id, "Sale already fiscalized; returning stored result");
    }

    Ok(existing.result())
}

impl std::fmt::Debug for FiscalizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiscalizationService")
            .field("sequencer", &self.sequencer)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
