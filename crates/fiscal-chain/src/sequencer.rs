//! # Chain Sequencer
//!
//! Serializes access to each device's chain head.
//!
//! ## Critical Section
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  allocate_next(D)                                                       │
//! │     │                                                                   │
//! │     ├── wait for D's lock (bounded by lock_timeout)                    │
//! │     │      └── timeout → ChainConflict, store untouched                │
//! │     ├── read D's last record → (seq + 1, record_hash) or (1, GENESIS)  │
//! │     ▼                                                                   │
//! │  ChainSlot  ── holds D's lock ──────────────────────────────┐          │
//! │     │                                                        │          │
//! │     ├── commit(record) → store.save (conditional append)    │          │
//! │     │      └── store conflict → ChainConflict               │          │
//! │     └── drop without commit → nothing written, no gap       │          │
//! │                                                  lock released ◄───────┘│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Different devices never wait on each other. A conflicting commit must be
//! retried from a fresh `allocate_next`, never with a bumped number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use fiscal_core::{ChainHash, DeviceId, FiscalAuditLogStore, FiscalAuditRecord, FiscalError, FiscalResult};

// =============================================================================
// Device Locks
// =============================================================================

/// Keyed async mutexes, one per device with callers in flight.
///
/// Entries are created on demand and pruned when the last holder or waiter
/// goes away. The map is only touched under its own short std mutex; Arc
/// clones of an entry are only taken while holding it.
#[derive(Debug, Default)]
struct DeviceLocks {
    slots: StdMutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    fn handle(&self, device_id: DeviceId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(device_id).or_default().clone()
    }

    /// Removes the device's entry if no one else references it.
    fn prune(&self, device_id: DeviceId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slots.get(&device_id) {
            if Arc::strong_count(entry) == 1 {
                slots.remove(&device_id);
            }
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A caller's claim on a device lock, held or still awaited.
///
/// Dropping it releases the lock (if held) and prunes the map entry.
struct DeviceLease {
    device_id: DeviceId,
    locks: Arc<DeviceLocks>,
    mutex: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DeviceLease {
    fn new(locks: Arc<DeviceLocks>, device_id: DeviceId) -> Self {
        let mutex = locks.handle(device_id);
        Self {
            device_id,
            locks,
            mutex: Some(mutex),
            guard: None,
        }
    }

    /// Waits for the lock; returns false on timeout.
    async fn acquire(&mut self, timeout: Duration) -> bool {
        let Some(mutex) = self.mutex.clone() else {
            return false;
        };
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.guard = Some(guard);
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        // Both Arc references must be gone before the count is checked.
        self.guard.take();
        self.mutex.take();
        self.locks.prune(self.device_id);
    }
}

// =============================================================================
// Chain Slot
// =============================================================================

/// The next position of a device's chain, reserved for one caller.
///
/// Holds the device's critical section until committed or dropped.
pub struct ChainSlot {
    device_id: DeviceId,
    sequence_number: u64,
    previous_hash: ChainHash,
    store: Arc<dyn FiscalAuditLogStore>,
    _lease: DeviceLease,
}

impl ChainSlot {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Sequence the record committed through this slot must carry.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Hash the record committed through this slot must link to.
    pub fn previous_hash(&self) -> &ChainHash {
        &self.previous_hash
    }

    /// Appends `record` through the store while the device lock is held.
    ///
    /// The record must carry exactly this slot's device, sequence and
    /// previous hash. A store conflict becomes [`FiscalError::ChainConflict`].
    pub async fn commit(self, record: FiscalAuditRecord) -> FiscalResult<FiscalAuditRecord> {
        if record.device_id != self.device_id
            || record.chain_sequence != self.sequence_number
            || record.previous_hash != self.previous_hash
        {
            error!(
                device_id = %self.device_id,
                slot_sequence = self.sequence_number,
                record_device_id = %record.device_id,
                record_sequence = record.chain_sequence,
                "Record does not fit its chain slot"
            );
            return Err(FiscalError::StorageFailure(format!(
                "record for device {} sequence {} does not match slot {} sequence {}",
                record.device_id, record.chain_sequence, self.device_id, self.sequence_number
            )));
        }

        match self.store.save(record).await {
            Ok(committed) => Ok(committed),
            Err(err) => {
                let err = FiscalError::from_store(self.device_id, err);
                if err.is_retryable() {
                    warn!(
                        device_id = %self.device_id,
                        sequence = self.sequence_number,
                        error = %err,
                        "Commit lost a race"
                    );
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ChainSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSlot")
            .field("device_id", &self.device_id)
            .field("sequence_number", &self.sequence_number)
            .field("previous_hash", &self.previous_hash)
            .finish()
    }
}

// =============================================================================
// Chain Sequencer
// =============================================================================

/// Allocates per-device chain positions.
#[derive(Clone)]
pub struct ChainSequencer {
    store: Arc<dyn FiscalAuditLogStore>,
    locks: Arc<DeviceLocks>,
    lock_timeout: Duration,
}

impl ChainSequencer {
    pub fn new(store: Arc<dyn FiscalAuditLogStore>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks: Arc::new(DeviceLocks::default()),
            lock_timeout,
        }
    }

    /// Enters the device's critical section and reads its head.
    ///
    /// Nothing is written; dropping the returned slot consumes no number.
    pub async fn allocate_next(&self, device_id: DeviceId) -> FiscalResult<ChainSlot> {
        let mut lease = DeviceLease::new(self.locks.clone(), device_id);

        if !lease.acquire(self.lock_timeout).await {
            warn!(
                device_id = %device_id,
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "Timed out waiting for device lock"
            );
            return Err(FiscalError::ChainConflict {
                device_id,
                reason: format!(
                    "device lock not acquired within {} ms",
                    self.lock_timeout.as_millis()
                ),
            });
        }

        debug!(device_id = %device_id, "Device lock acquired");

        let last = self
            .store
            .find_last_by_device(device_id)
            .await
            .map_err(|e| FiscalError::from_store(device_id, e))?;

        let (sequence_number, previous_hash) = match last {
            Some(last) => (last.chain_sequence + 1, last.record_hash),
            None => (1, ChainHash::GENESIS),
        };

        debug!(
            device_id = %device_id,
            sequence = sequence_number,
            previous = %previous_hash.short(),
            "Chain slot allocated"
        );

        Ok(ChainSlot {
            device_id,
            sequence_number,
            previous_hash,
            store: self.store.clone(),
            _lease: lease,
        })
    }

    /// Number of devices with a lock entry (held or awaited).
    pub fn active_devices(&self) -> usize {
        self.locks.len()
    }
}

impl std::fmt::Debug for ChainSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSequencer")
            .field("lock_timeout", &self.lock_timeout)
            .field("active_devices", &self.active_devices())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{command, record_for, MemoryStore};

    fn sequencer(store: &Arc<MemoryStore>, timeout_ms: u64) -> ChainSequencer {
        ChainSequencer::new(store.clone(), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_empty_chain_starts_at_genesis() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 1_000);

        let slot = seq.allocate_next(DeviceId::generate()).await.unwrap();
        assert_eq!(slot.sequence_number(), 1);
        assert_eq!(*slot.previous_hash(), ChainHash::GENESIS);
    }

    #[tokio::test]
    async fn test_commit_extends_chain() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 1_000);
        let device = DeviceId::generate();

        let slot = seq.allocate_next(device).await.unwrap();
        let first = record_for(&command(device), &slot);
        let first = slot.commit(first).await.unwrap();

        let slot = seq.allocate_next(device).await.unwrap();
        assert_eq!(slot.sequence_number(), 2);
        assert_eq!(*slot.previous_hash(), first.record_hash);
    }

    #[tokio::test]
    async fn test_dropped_slot_consumes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 1_000);
        let device = DeviceId::generate();

        drop(seq.allocate_next(device).await.unwrap());

        let slot = seq.allocate_next(device).await.unwrap();
        assert_eq!(slot.sequence_number(), 1);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_conflict_without_store_access() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 50);
        let device = DeviceId::generate();

        let held = seq.allocate_next(device).await.unwrap();
        let reads_before = store.reads();

        let err = seq.allocate_next(device).await.unwrap_err();
        assert!(matches!(err, FiscalError::ChainConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.reads(), reads_before);

        // The holder can still commit sequence 1; no gap is left behind.
        let record = record_for(&command(device), &held);
        held.commit(record).await.unwrap();
        assert_eq!(seq.allocate_next(device).await.unwrap().sequence_number(), 2);
    }

    #[tokio::test]
    async fn test_other_devices_do_not_wait() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 50);

        let _held = seq.allocate_next(DeviceId::generate()).await.unwrap();
        let other = seq.allocate_next(DeviceId::generate()).await.unwrap();
        assert_eq!(other.sequence_number(), 1);
        assert_eq!(seq.active_devices(), 2);
    }

    #[tokio::test]
    async fn test_lock_entries_are_pruned() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 50);
        let device = DeviceId::generate();

        let held = seq.allocate_next(device).await.unwrap();
        let _ = seq.allocate_next(device).await.unwrap_err();
        assert_eq!(seq.active_devices(), 1);

        drop(held);
        assert_eq!(seq.active_devices(), 0);
    }

    #[tokio::test]
    async fn test_store_conflict_on_commit() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 1_000);
        let device = DeviceId::generate();

        let slot = seq.allocate_next(device).await.unwrap();
        store.fail_next_save_with_conflict();
        let record = record_for(&command(device), &slot);
        let err = slot.commit(record).await.unwrap_err();
        assert!(matches!(err, FiscalError::ChainConflict { .. }));

        // Restarting from a fresh read reuses the number.
        assert_eq!(seq.allocate_next(device).await.unwrap().sequence_number(), 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_mismatched_record() {
        let store = Arc::new(MemoryStore::default());
        let seq = sequencer(&store, 1_000);
        let device = DeviceId::generate();

        let slot = seq.allocate_next(device).await.unwrap();
        let mut record = record_for(&command(device), &slot);
        record.chain_sequence = 7;
        let err = slot.commit(record).await.unwrap_err();
        assert!(matches!(err, FiscalError::StorageFailure(_)));
        assert_eq!(store.len(), 0);

        // The rejected slot released the lock and consumed no number.
        let slot = seq.allocate_next(device).await.unwrap();
        assert_eq!(slot.sequence_number(), 1);
        let mut record = record_for(&command(device), &slot);
        record.previous_hash = ChainHash::from_digest([9; 32]);
        let err = slot.commit(record).await.unwrap_err();
        assert!(matches!(err, FiscalError::StorageFailure(ref msg) if msg.contains("does not match slot")));

        let slot = seq.allocate_next(device).await.unwrap();
        let record = record_for(&command(DeviceId::generate()), &slot);
        assert!(matches!(
            slot.commit(record).await,
            Err(FiscalError::StorageFailure(_))
        ));
        assert_eq!(store.len(), 0);
    }
}
