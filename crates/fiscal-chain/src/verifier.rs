//! # Chain Verifier
//!
//! Re-walks committed chains page by page and reports the first break.
//!
//! ```text
//!   store.list_by_device(D, offset, page_size) ──► ChainWalker::push ──┐
//!        ▲                                                             │
//!        └──────────────── next page while page is full ◄──────────────┘
//! ```
//!
//! Verification is read-only and takes no device lock; records committed
//! while a walk is in progress may or may not be included.
//!
//! A record whose stored columns no longer decode is a break at its own
//! sequence, not a storage failure. The page holding it is re-read one record
//! at a time so that earlier breaks are still reported first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use fiscal_core::chain::BrokenLink;
use fiscal_core::{
    ChainVerification, ChainWalker, DeviceId, FiscalAuditLogStore, FiscalError, FiscalResult,
    StoreError,
};

/// Verification outcome for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceChainReport {
    pub device_id: DeviceId,
    /// `None` when the chain could not be read at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<ChainVerification>,
    /// Storage failure that stopped this device's walk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceChainReport {
    pub fn new(device_id: DeviceId, result: FiscalResult<ChainVerification>) -> Self {
        match result {
            Ok(verification) => Self {
                device_id,
                verification: Some(verification),
                error: None,
            },
            Err(err) => Self {
                device_id,
                verification: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verification.as_ref().is_some_and(ChainVerification::is_valid)
    }

    /// True when the walk completed and found a break.
    pub fn is_broken(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| !v.is_valid())
    }
}

/// Read-only chain checker over a store.
#[derive(Clone)]
pub struct ChainVerifier {
    store: Arc<dyn FiscalAuditLogStore>,
    page_size: u32,
}

impl ChainVerifier {
    /// `page_size` is clamped to at least one record.
    pub fn new(store: Arc<dyn FiscalAuditLogStore>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Walks the device's chain from sequence 1.
    ///
    /// A broken chain, including one with an unreadable record, is an `Ok`
    /// outcome; errors are reserved for storage that cannot be read.
    pub async fn verify_chain(&self, device_id: DeviceId) -> FiscalResult<ChainVerification> {
        let mut walker = ChainWalker::new();
        let mut offset: u64 = 0;
        let mut limit = self.page_size;

        loop {
            let page = match self.store.list_by_device(device_id, offset, limit).await {
                Ok(page) => page,
                Err(StoreError::UnreadableRecord { sequence, .. }) if limit > 1 => {
                    debug!(
                        device_id = %device_id,
                        offset,
                        sequence,
                        "Unreadable record in page, reading singly"
                    );
                    limit = 1;
                    continue;
                }
                Err(StoreError::UnreadableRecord {
                    sequence,
                    column,
                    reason,
                }) => {
                    warn!(
                        device_id = %device_id,
                        sequence,
                        %column,
                        %reason,
                        "Fiscal record is unreadable"
                    );
                    return Ok(broken_at(device_id, walker.push_unreadable(sequence, &column)));
                }
                Err(err) => return Err(read_failure(err)),
            };

            for record in &page {
                if let Err(broken) = walker.push(record) {
                    return Ok(broken_at(device_id, broken));
                }
            }

            if page.len() < limit as usize {
                break;
            }
            offset += page.len() as u64;
            debug!(device_id = %device_id, verified = walker.verified(), "Verified page");
        }

        let verification = walker.finish();
        debug!(device_id = %device_id, ?verification, "Chain verified");
        Ok(verification)
    }

    /// Verifies every device that has committed records.
    ///
    /// A device whose records cannot be read gets a report carrying the
    /// error; the remaining devices are still verified.
    pub async fn verify_all(&self) -> FiscalResult<Vec<DeviceChainReport>> {
        let devices = self.store.list_devices().await.map_err(read_failure)?;

        let mut reports = Vec::with_capacity(devices.len());
        for device_id in devices {
            let result = self.verify_chain(device_id).await;
            if let Err(err) = &result {
                warn!(device_id = %device_id, error = %err, "Fiscal chain could not be read");
            }
            reports.push(DeviceChainReport::new(device_id, result));
        }

        let broken = reports.iter().filter(|r| r.is_broken()).count();
        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        info!(devices = reports.len(), broken, failed, "Verified all fiscal chains");
        Ok(reports)
    }
}

impl std::fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainVerifier")
            .field("page_size", &self.page_size)
            .finish()
    }
}

fn broken_at(device_id: DeviceId, broken: BrokenLink) -> ChainVerification {
    warn!(
        device_id = %device_id,
        sequence = broken.sequence,
        reason = %broken.reason,
        "Fiscal chain is broken"
    );
    ChainVerification::BrokenAt {
        sequence: broken.sequence,
        reason: broken.reason,
    }
}

/// Reads never race a head, so any other store error is a storage failure.
fn read_failure(err: StoreError) -> FiscalError {
    FiscalError::StorageFailure(err.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::FiscalizationService;
    use crate::testing::{command, store_of, MemoryDirectory, MemoryStore};
    use fiscal_core::{ChainBreak, ChainHash, Money, PendingRecord};
    use std::time::Duration;

    /// A store with `n` committed records per device.
    async fn seeded(devices: &[DeviceId], n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        let directory = devices
            .iter()
            .fold(MemoryDirectory::default(), |dir, d| dir.with_active(*d, store_of(0x51)));
        let service =
            FiscalizationService::new(store.clone(), Arc::new(directory), Duration::from_secs(1));
        for device in devices {
            for _ in 0..n {
                service.execute(command(*device)).await.unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_valid_chain_across_pages() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 5).await;
        let head = store.find_last_by_device(device).await.unwrap().unwrap();

        for page_size in [1, 2, 5, 100] {
            let verifier = ChainVerifier::new(store.clone(), page_size);
            assert_eq!(
                verifier.verify_chain(device).await.unwrap(),
                ChainVerification::Valid {
                    records: 5,
                    head: Some(head.record_hash),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_valid() {
        let store = Arc::new(MemoryStore::default());
        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(DeviceId::generate()).await.unwrap(),
            ChainVerification::Valid {
                records: 0,
                head: None,
            }
        );
    }

    #[tokio::test]
    async fn test_altered_amount_is_hash_mismatch() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 5).await;
        store.tamper(device, 3, |r| r.invoice_amount = Money::from_cents(1));

        let verifier = ChainVerifier::new(store, 2);
        let verification = verifier.verify_chain(device).await.unwrap();
        assert_eq!(
            verification,
            ChainVerification::BrokenAt {
                sequence: 3,
                reason: ChainBreak::HashMismatch,
            }
        );

        let err = verification.into_result(device).unwrap_err();
        assert!(matches!(
            err,
            FiscalError::ChainIntegrityViolation { sequence: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_rehashed_record_breaks_next_link() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 4).await;
        store.tamper(device, 2, |r| {
            r.invoice_amount = Money::from_cents(1);
            r.record_hash = r.recompute_hash();
        });

        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 3,
                reason: ChainBreak::PreviousHashMismatch,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_record_is_sequence_gap() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 5).await;
        store.remove(device, 3);

        let verifier = ChainVerifier::new(store, 2);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 3,
                reason: ChainBreak::SequenceGap,
            }
        );
    }

    #[tokio::test]
    async fn test_injected_record_is_detected() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 2).await;

        // Sequence 4 written by someone skipping 3, correctly hashed.
        let head = store.find_last_by_device(device).await.unwrap().unwrap();
        let forged = PendingRecord::from_command(&command(device), 4, head.record_hash).seal();
        store.insert_raw(forged);

        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 3,
                reason: ChainBreak::SequenceGap,
            }
        );
    }

    #[tokio::test]
    async fn test_chain_not_rooted_at_genesis() {
        let device = DeviceId::generate();
        let store = Arc::new(MemoryStore::default());
        let not_genesis = ChainHash::from_hex(&"ab".repeat(32)).unwrap();
        store.insert_raw(PendingRecord::from_command(&command(device), 1, not_genesis).seal());

        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 1,
                reason: ChainBreak::PreviousHashMismatch,
            }
        );
    }

    #[tokio::test]
    async fn test_verify_all_reports_each_device() {
        let good = DeviceId::generate();
        let bad = DeviceId::generate();
        let store = seeded(&[good, bad], 3).await;
        store.tamper(bad, 1, |r| r.software_version = "9.9.9".to_string());

        let verifier = ChainVerifier::new(store, 2);
        let reports = verifier.verify_all().await.unwrap();
        assert_eq!(reports.len(), 2);

        for report in reports {
            if report.device_id == good {
                assert!(report.is_valid());
            } else {
                assert!(report.is_broken());
                assert_eq!(
                    report.verification,
                    Some(ChainVerification::BrokenAt {
                        sequence: 1,
                        reason: ChainBreak::HashMismatch,
                    })
                );
            }
        }
    }

    #[tokio::test]
    async fn test_unreadable_record_is_a_break() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 5).await;
        store.mark_unreadable(device, 4, "record_hash");

        for page_size in [1, 2, 10] {
            let verifier = ChainVerifier::new(store.clone(), page_size);
            assert_eq!(
                verifier.verify_chain(device).await.unwrap(),
                ChainVerification::BrokenAt {
                    sequence: 4,
                    reason: ChainBreak::HashMismatch,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_unreadable_previous_hash_is_link_break() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 3).await;
        store.mark_unreadable(device, 2, "previous_hash");

        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 2,
                reason: ChainBreak::PreviousHashMismatch,
            }
        );
    }

    #[tokio::test]
    async fn test_earlier_break_wins_over_unreadable_record() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 5).await;
        store.tamper(device, 2, |r| r.invoice_amount = Money::from_cents(1));
        store.mark_unreadable(device, 4, "invoice_date");

        let verifier = ChainVerifier::new(store, 10);
        assert_eq!(
            verifier.verify_chain(device).await.unwrap(),
            ChainVerification::BrokenAt {
                sequence: 2,
                reason: ChainBreak::HashMismatch,
            }
        );
    }

    #[tokio::test]
    async fn test_verify_all_continues_past_unreadable_device() {
        let good = DeviceId::generate();
        let failing = DeviceId::generate();
        let store = seeded(&[good, failing], 2).await;
        store.fail_reads_for(failing);

        let verifier = ChainVerifier::new(store, 10);
        let reports = verifier.verify_all().await.unwrap();
        assert_eq!(reports.len(), 2);

        let good_report = reports.iter().find(|r| r.device_id == good).unwrap();
        assert!(good_report.is_valid());

        let failed = reports.iter().find(|r| r.device_id == failing).unwrap();
        assert_eq!(failed.verification, None);
        assert!(!failed.is_valid());
        assert!(!failed.is_broken());
        assert!(failed.error.as_deref().unwrap().contains("reads failing"));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_storage_failure() {
        let device = DeviceId::generate();
        let store = seeded(&[device], 1).await;
        store.set_unavailable(true);

        let verifier = ChainVerifier::new(store, 10);
        assert!(matches!(
            verifier.verify_chain(device).await,
            Err(FiscalError::StorageFailure(_))
        ));
        assert!(matches!(
            verifier.verify_all().await,
            Err(FiscalError::StorageFailure(_))
        ));
    }

    #[test]
    fn test_report_serializes_with_status_tag() {
        let report = DeviceChainReport::new(
            DeviceId::generate(),
            Ok(ChainVerification::BrokenAt {
                sequence: 7,
                reason: ChainBreak::SequenceGap,
            }),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["verification"]["status"], "BROKEN_AT");
        assert_eq!(json["verification"]["reason"], "SEQUENCE_GAP");
        assert_eq!(json["verification"]["sequence"], 7);
        assert!(json.get("error").is_none());

        let report = DeviceChainReport::new(
            DeviceId::generate(),
            Err(FiscalError::StorageFailure("disk I/O error".into())),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("verification").is_none());
        assert!(json["error"].as_str().unwrap().contains("disk I/O error"));
    }

    mod sqlite {
        use super::*;
        use fiscal_db::{Database, DbConfig};

        async fn db_with_chains(devices: &[DeviceId], n: usize) -> Database {
            let db = Database::new(DbConfig::in_memory()).await.unwrap();
            for device in devices {
                db.devices().register(*device, store_of(0x51)).await.unwrap();
            }
            let service = FiscalizationService::new(
                Arc::new(db.fiscal_log()),
                Arc::new(db.devices()),
                Duration::from_secs(1),
            );
            for device in devices {
                for _ in 0..n {
                    service.execute(command(*device)).await.unwrap();
                }
            }
            db
        }

        async fn rewrite(db: &Database, sql: &str, device: DeviceId) {
            sqlx::query("DROP TRIGGER IF EXISTS fiscal_audit_log_no_update")
                .execute(db.pool())
                .await
                .unwrap();
            sqlx::query(sql)
                .bind(device.to_string())
                .execute(db.pool())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_uppercased_hash_is_reported_as_break() {
            let good = DeviceId::generate();
            let bad = DeviceId::generate();
            let db = db_with_chains(&[good, bad], 3).await;

            rewrite(
                &db,
                "UPDATE fiscal_audit_log SET record_hash = upper(record_hash) \
                 WHERE device_id = ?1 AND chain_sequence = 2",
                bad,
            )
            .await;

            let verifier = ChainVerifier::new(Arc::new(db.fiscal_log()), 100);
            assert_eq!(
                verifier.verify_chain(bad).await.unwrap(),
                ChainVerification::BrokenAt {
                    sequence: 2,
                    reason: ChainBreak::HashMismatch,
                }
            );

            let reports = verifier.verify_all().await.unwrap();
            assert_eq!(reports.len(), 2);
            let good_report = reports.iter().find(|r| r.device_id == good).unwrap();
            assert!(matches!(
                good_report.verification,
                Some(ChainVerification::Valid { records: 3, .. })
            ));
            let bad_report = reports.iter().find(|r| r.device_id == bad).unwrap();
            assert_eq!(
                bad_report.verification,
                Some(ChainVerification::BrokenAt {
                    sequence: 2,
                    reason: ChainBreak::HashMismatch,
                })
            );
        }

        #[tokio::test]
        async fn test_non_hex_previous_hash_is_link_break() {
            let device = DeviceId::generate();
            let db = db_with_chains(&[device], 3).await;

            rewrite(
                &db,
                "UPDATE fiscal_audit_log SET previous_hash = substr(previous_hash, 1, 63) || 'g' \
                 WHERE device_id = ?1 AND chain_sequence = 3",
                device,
            )
            .await;

            let verifier = ChainVerifier::new(Arc::new(db.fiscal_log()), 2);
            assert_eq!(
                verifier.verify_chain(device).await.unwrap(),
                ChainVerification::BrokenAt {
                    sequence: 3,
                    reason: ChainBreak::PreviousHashMismatch,
                }
            );
        }

        #[tokio::test]
        async fn test_unparseable_invoice_date_is_hash_mismatch() {
            let device = DeviceId::generate();
            let db = db_with_chains(&[device], 2).await;

            rewrite(
                &db,
                "UPDATE fiscal_audit_log SET invoice_date = 'not a date' \
                 WHERE device_id = ?1 AND chain_sequence = 1",
                device,
            )
            .await;

            let verifier = ChainVerifier::new(Arc::new(db.fiscal_log()), 10);
            assert_eq!(
                verifier.verify_chain(device).await.unwrap(),
                ChainVerification::BrokenAt {
                    sequence: 1,
                    reason: ChainBreak::HashMismatch,
                }
            );
        }
    }
}
