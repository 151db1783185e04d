//! In-memory port doubles with fault injection, shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::sequencer::ChainSlot;
use fiscal_core::{
    ChainHash, DeviceContext, DeviceDirectory, DeviceId, DeviceStatus, FiscalAuditLogStore,
    FiscalAuditRecord, FiscalizeSaleCommand, Money, PendingRecord, SaleId, StoreError, StoreId,
    StoreResult,
};

pub fn store_of(n: u128) -> StoreId {
    StoreId::from_uuid(uuid::Uuid::from_u128(n))
}

/// A valid command for `device` in store 0x51, with a fresh sale id.
pub fn command(device_id: DeviceId) -> FiscalizeSaleCommand {
    FiscalizeSaleCommand {
        sale_id: SaleId::generate(),
        store_id: store_of(0x51),
        device_id,
        invoice_amount: Money::from_cents(1999),
        invoice_date: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        software_id: "POS-1".to_string(),
        software_version: "1.0.0".to_string(),
        developer_id: "B00000000".to_string(),
    }
}

/// Seals `command` into the position reserved by `slot`.
pub fn record_for(command: &FiscalizeSaleCommand, slot: &ChainSlot) -> FiscalAuditRecord {
    PendingRecord::from_command(command, slot.sequence_number(), *slot.previous_hash()).seal()
}

// =============================================================================
// Memory Store
// =============================================================================

/// Append-only store with the same conditional-append rules as SQLite.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FiscalAuditRecord>>,
    reads: AtomicUsize,
    conflict_next_save: AtomicBool,
    unavailable: AtomicBool,
    save_delay: Mutex<Option<Duration>>,
    unreadable: Mutex<HashMap<(DeviceId, u64), String>>,
    failing_devices: Mutex<HashSet<DeviceId>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Number of head/sale/page reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_next_save_with_conflict(&self) {
        self.conflict_next_save.store(true, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleeps inside `save` so concurrent callers interleave.
    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }

    /// Inserts without any checks, as a tampering writer would.
    pub fn insert_raw(&self, record: FiscalAuditRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// Mutates a stored record in place, bypassing immutability.
    pub fn tamper(&self, device_id: DeviceId, sequence: u64, f: impl FnOnce(&mut FiscalAuditRecord)) {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.device_id == device_id && r.chain_sequence == sequence)
            .expect("record to tamper with");
        f(record);
    }

    /// Removes a stored record, bypassing immutability.
    pub fn remove(&self, device_id: DeviceId, sequence: u64) {
        self.records
            .lock()
            .unwrap()
            .retain(|r| !(r.device_id == device_id && r.chain_sequence == sequence));
    }

    /// Makes any page that covers the record fail on `column`, as an
    /// altered row fails to decode.
    pub fn mark_unreadable(&self, device_id: DeviceId, sequence: u64, column: &str) {
        self.unreadable
            .lock()
            .unwrap()
            .insert((device_id, sequence), column.to_string());
    }

    /// Fails page reads for one device only.
    pub fn fail_reads_for(&self, device_id: DeviceId) {
        self.failing_devices.lock().unwrap().insert(device_id);
    }

    pub fn sequences(&self, device_id: DeviceId) -> Vec<u64> {
        let mut seqs: Vec<u64> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .map(|r| r.chain_sequence)
            .collect();
        seqs.sort_unstable();
        seqs
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FiscalAuditLogStore for MemoryStore {
    async fn save(&self, record: FiscalAuditRecord) -> StoreResult<FiscalAuditRecord> {
        self.check_available()?;

        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.conflict_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        let head = records
            .iter()
            .filter(|r| r.device_id == record.device_id)
            .max_by_key(|r| r.chain_sequence);
        let (expected, head_hash) = match head {
            Some(h) => (h.chain_sequence + 1, h.record_hash),
            None => (1, ChainHash::GENESIS),
        };
        if record.chain_sequence != expected || record.previous_hash != head_hash {
            return Err(StoreError::Conflict(format!(
                "head moved: expected {expected}, got {}",
                record.chain_sequence
            )));
        }
        if records.iter().any(|r| r.sale_id == record.sale_id) {
            return Err(StoreError::Conflict("duplicate sale".to_string()));
        }

        let committed = FiscalAuditRecord {
            created_at: Utc::now(),
            ..record
        };
        records.push(committed.clone());
        Ok(committed)
    }

    async fn find_last_by_device(
        &self,
        device_id: DeviceId,
    ) -> StoreResult<Option<FiscalAuditRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .max_by_key(|r| r.chain_sequence)
            .cloned())
    }

    async fn find_by_sale(&self, sale_id: SaleId) -> StoreResult<Option<FiscalAuditRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.sale_id == sale_id)
            .cloned())
    }

    async fn list_by_device(
        &self,
        device_id: DeviceId,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<FiscalAuditRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut records: Vec<FiscalAuditRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        if self.failing_devices.lock().unwrap().contains(&device_id) {
            return Err(StoreError::Unavailable(format!("reads failing for {device_id}")));
        }
        records.sort_by_key(|r| r.chain_sequence);
        let page: Vec<FiscalAuditRecord> = records
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        let unreadable = self.unreadable.lock().unwrap();
        for record in &page {
            if let Some(column) = unreadable.get(&(device_id, record.chain_sequence)) {
                return Err(StoreError::UnreadableRecord {
                    sequence: record.chain_sequence,
                    column: column.clone(),
                    reason: "invalid text".to_string(),
                });
            }
        }
        Ok(page)
    }

    async fn list_devices(&self) -> StoreResult<Vec<DeviceId>> {
        self.check_available()?;
        let mut devices: Vec<DeviceId> =
            self.records.lock().unwrap().iter().map(|r| r.device_id).collect();
        devices.sort();
        devices.dedup();
        Ok(devices)
    }
}

// =============================================================================
// Memory Directory
// =============================================================================

#[derive(Default)]
pub struct MemoryDirectory {
    devices: Mutex<HashMap<DeviceId, DeviceContext>>,
    unavailable: AtomicBool,
}

impl MemoryDirectory {
    /// Registers `device_id` as active in `store_id`.
    pub fn with_active(self, device_id: DeviceId, store_id: StoreId) -> Self {
        self.set(device_id, store_id, DeviceStatus::Active);
        self
    }

    pub fn set(&self, device_id: DeviceId, store_id: StoreId, status: DeviceStatus) {
        self.devices.lock().unwrap().insert(
            device_id,
            DeviceContext {
                device_id,
                store_id,
                status,
            },
        );
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn resolve(&self, device_id: DeviceId) -> StoreResult<Option<DeviceContext>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("directory offline".to_string()));
        }
        Ok(self.devices.lock().unwrap().get(&device_id).cloned())
    }
}
