//! # Chain Walker
//!
//! Pure, incremental verification of one device's chain.
//!
//! Records are fed in increasing sequence order. Each record goes through
//! three checks, and the first one to fail decides the reported break:
//!
//! ```text
//! record n ──► sequence == expected ? ──no──► SEQUENCE_GAP
//!                   │ yes
//!                   ▼
//!              previous_hash == hash(n-1) (or GENESIS) ? ──no──► PREVIOUS_HASH_MISMATCH
//!                   │ yes
//!                   ▼
//!              recompute(n) == record_hash(n) ? ──no──► HASH_MISMATCH
//!                   │ yes
//!                   ▼
//!              expected = n + 1, previous = record_hash(n)
//! ```
//!
//! A number lower than expected (a duplicate) is reported at that number. A
//! number higher than expected is reported at the first missing number.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FiscalError;
use crate::types::{ChainHash, DeviceId, FiscalAuditRecord};

/// Why a chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainBreak {
    /// A sequence number is missing or repeated.
    SequenceGap,
    /// A record does not point at its predecessor's stored hash.
    PreviousHashMismatch,
    /// A record's stored hash does not match its content.
    HashMismatch,
}

impl ChainBreak {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChainBreak::SequenceGap => "SEQUENCE_GAP",
            ChainBreak::PreviousHashMismatch => "PREVIOUS_HASH_MISMATCH",
            ChainBreak::HashMismatch => "HASH_MISMATCH",
        }
    }
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of verifying a device's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainVerification {
    /// Every record checked out. `head` is `None` for an empty chain.
    Valid { records: u64, head: Option<ChainHash> },
    /// The first violation found.
    BrokenAt { sequence: u64, reason: ChainBreak },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid { .. })
    }

    /// Converts a break into [`FiscalError::ChainIntegrityViolation`].
    ///
    /// Returns the number of verified records when the chain is valid.
    pub fn into_result(self, device_id: DeviceId) -> Result<u64, FiscalError> {
        match self {
            ChainVerification::Valid { records, .. } => Ok(records),
            ChainVerification::BrokenAt { sequence, reason } => {
                Err(FiscalError::ChainIntegrityViolation {
                    device_id,
                    sequence,
                    reason,
                })
            }
        }
    }
}

/// The first violation found while walking, as returned by [`ChainWalker::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokenLink {
    pub sequence: u64,
    pub reason: ChainBreak,
}

/// Incremental chain checker; state is the next expected sequence and hash.
#[derive(Debug, Clone)]
pub struct ChainWalker {
    expected_sequence: u64,
    previous_hash: ChainHash,
    verified: u64,
}

impl ChainWalker {
    pub fn new() -> Self {
        Self {
            expected_sequence: 1,
            previous_hash: ChainHash::GENESIS,
            verified: 0,
        }
    }

    /// Checks the next record in sequence order.
    ///
    /// After an error the walker should be discarded; its state still points
    /// at the last good record.
    pub fn push(&mut self, record: &FiscalAuditRecord) -> Result<(), BrokenLink> {
        self.check_sequence(record.chain_sequence)?;
        if record.previous_hash != self.previous_hash {
            return Err(BrokenLink {
                sequence: record.chain_sequence,
                reason: ChainBreak::PreviousHashMismatch,
            });
        }
        if record.recompute_hash() != record.record_hash {
            return Err(BrokenLink {
                sequence: record.chain_sequence,
                reason: ChainBreak::HashMismatch,
            });
        }

        self.expected_sequence = record.chain_sequence + 1;
        self.previous_hash = record.record_hash;
        self.verified += 1;
        Ok(())
    }

    /// Reports the next record when its stored columns could not be decoded.
    ///
    /// A sequence break still wins. Otherwise an unreadable `previous_hash`
    /// is a `PreviousHashMismatch`; any other column means the stored hash
    /// cannot be confirmed, a `HashMismatch`.
    pub fn push_unreadable(&mut self, sequence: u64, column: &str) -> BrokenLink {
        if let Err(broken) = self.check_sequence(sequence) {
            return broken;
        }
        let reason = if column == "previous_hash" {
            ChainBreak::PreviousHashMismatch
        } else {
            ChainBreak::HashMismatch
        };
        BrokenLink { sequence, reason }
    }

    /// Duplicates are reported at their own number, gaps at the first missing one.
    fn check_sequence(&self, sequence: u64) -> Result<(), BrokenLink> {
        if sequence < self.expected_sequence {
            return Err(BrokenLink {
                sequence,
                reason: ChainBreak::SequenceGap,
            });
        }
        if sequence > self.expected_sequence {
            return Err(BrokenLink {
                sequence: self.expected_sequence,
                reason: ChainBreak::SequenceGap,
            });
        }
        Ok(())
    }

    /// Number of records accepted so far.
    pub fn verified(&self) -> u64 {
        self.verified
    }

    /// Ends a walk in which every pushed record was accepted.
    pub fn finish(self) -> ChainVerification {
        ChainVerification::Valid {
            records: self.verified,
            head: (self.verified > 0).then_some(self.previous_hash),
        }
    }
}

impl Default for ChainWalker {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a complete in-memory chain, already sorted by sequence.
pub fn verify_records(records: &[FiscalAuditRecord]) -> ChainVerification {
    let mut walker = ChainWalker::new();
    for record in records {
        if let Err(link) = walker.push(record) {
            return ChainVerification::BrokenAt {
                sequence: link.sequence,
                reason: link.reason,
            };
        }
    }
    walker.finish()
}

// =============================================================================
// Unit Tests
// =============================================================================
