//! # Fiscal Types
//!
//! Identifiers, the fiscal audit record and the command/result pair of the
//! fiscalization use case.
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  FiscalizeSaleCommand                                                   │
//! │        │  + (chain_sequence, previous_hash) from the device's slot     │
//! │        ▼                                                                │
//! │  PendingRecord  ──seal()──►  FiscalAuditRecord  ──store.save()──►      │
//! │  (no hash yet)               (hashed, not visible)    committed        │
//! │                                                                         │
//! │  Committed records are never updated or deleted.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::hasher::{self, CanonicalRecord};
use crate::money::Money;

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wraps an existing UUID.
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Generates a random (v4) identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the wrapped UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// True for the all-zero UUID, which is never a valid identity.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        /// Lowercase hyphenated form, as used in the canonical record.
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ValidationError::InvalidFormat {
                        field: $field.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

uuid_id!(
    /// Point-of-sale device that owns a chain.
    DeviceId,
    "device_id"
);
uuid_id!(
    /// Store the device is registered to.
    StoreId,
    "store_id"
);
uuid_id!(
    /// Sale being fiscalized. A sale appears at most once in the whole log.
    SaleId,
    "sale_id"
);
uuid_id!(
    /// Identity of a committed fiscal audit record.
    FiscalLogId,
    "fiscal_log_id"
);

// =============================================================================
// Enums
// =============================================================================

/// Kind of fiscal event recorded in the chain.
///
/// Only invoice issuance exists today. Voids or cancellations, when added,
/// get their own variant and are chained like any other record; the chain is
/// never allowed to skip a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum FiscalEventType {
    Issue,
}

impl FiscalEventType {
    /// Token written into the canonical form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FiscalEventType::Issue => "ISSUE",
        }
    }
}

impl fmt::Display for FiscalEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FiscalEventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ISSUE" => Ok(FiscalEventType::Issue),
            other => Err(ValidationError::InvalidFormat {
                field: "event_type".to_string(),
                reason: format!("unknown event type '{other}'"),
            }),
        }
    }
}

impl Default for FiscalEventType {
    fn default() -> Self {
        FiscalEventType::Issue
    }
}

/// Registration status of a device.
///
/// Only `Active` devices may fiscalize sales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Suspended,
}

impl DeviceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "suspended" => Ok(DeviceStatus::Suspended),
            other => Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: format!("expected active, inactive or suspended, got '{other}'"),
            }),
        }
    }
}

/// What the device directory knows about a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub device_id: DeviceId,
    pub store_id: StoreId,
    pub status: DeviceStatus,
}

// =============================================================================
// Chain Hash
// =============================================================================

/// A SHA-256 digest linking records, rendered as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHash([u8; 32]);

impl ChainHash {
    /// Previous hash of the first record of every chain: 64 ASCII `0`.
    pub const GENESIS: ChainHash = ChainHash([0u8; 32]);

    /// Wraps a raw digest.
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        ChainHash(digest)
    }

    /// Parses 64 lowercase hex characters.
    ///
    /// ```rust
    /// use fiscal_core::ChainHash;
    ///
    /// let genesis = ChainHash::from_hex(&"0".repeat(64)).unwrap();
    /// assert_eq!(genesis, ChainHash::GENESIS);
    /// assert!(ChainHash::from_hex("abc").is_err());
    /// assert!(ChainHash::from_hex(&"A".repeat(64)).is_err());
    /// ```
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "hash".to_string(),
            reason: reason.to_string(),
        };

        if s.len() != 64 {
            return Err(invalid("expected 64 hex characters"));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid("hex must be lowercase"));
        }

        let mut digest = [0u8; 32];
        hex::decode_to_slice(s, &mut digest).map_err(|e| invalid(&e.to_string()))?;
        Ok(ChainHash(digest))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == ChainHash::GENESIS
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self.to_hex())
    }
}

impl FromStr for ChainHash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainHash::from_hex(s)
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Command / Result
// =============================================================================

/// Request to fiscalize one sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalizeSaleCommand {
    pub sale_id: SaleId,
    pub store_id: StoreId,
    pub device_id: DeviceId,
    pub invoice_amount: Money,
    pub invoice_date: DateTime<Utc>,
    pub software_id: String,
    pub software_version: String,
    pub developer_id: String,
}

/// Outcome of a successful (or idempotently repeated) fiscalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalizeSaleResult {
    pub fiscal_log_id: FiscalLogId,
    pub record_hash: ChainHash,
    pub chain_sequence: u64,
}

// =============================================================================
// Records
// =============================================================================

/// A record whose place in the chain is known but whose hash is not computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub fiscal_log_id: FiscalLogId,
    pub sale_id: SaleId,
    pub store_id: StoreId,
    pub device_id: DeviceId,
    pub event_type: FiscalEventType,
    pub chain_sequence: u64,
    pub invoice_amount: Money,
    pub invoice_date: DateTime<Utc>,
    pub previous_hash: ChainHash,
    pub software_id: String,
    pub software_version: String,
    pub developer_id: String,
}

impl PendingRecord {
    /// Builds the candidate record for an allocated chain position.
    ///
    /// The invoice date is truncated to milliseconds, the precision of the
    /// canonical form, so what is stored is exactly what was hashed.
    pub fn from_command(
        command: &FiscalizeSaleCommand,
        chain_sequence: u64,
        previous_hash: ChainHash,
    ) -> Self {
        Self {
            fiscal_log_id: FiscalLogId::generate(),
            sale_id: command.sale_id,
            store_id: command.store_id,
            device_id: command.device_id,
            event_type: FiscalEventType::Issue,
            chain_sequence,
            invoice_amount: command.invoice_amount,
            invoice_date: command.invoice_date.trunc_subsecs(3),
            previous_hash,
            software_id: command.software_id.clone(),
            software_version: command.software_version.clone(),
            developer_id: command.developer_id.clone(),
        }
    }

    /// Borrowed view of the hashed fields.
    pub fn canonical(&self) -> CanonicalRecord<'_> {
        CanonicalRecord {
            chain_sequence: self.chain_sequence,
            device_id: self.device_id,
            store_id: self.store_id,
            sale_id: self.sale_id,
            event_type: self.event_type,
            invoice_amount: self.invoice_amount,
            invoice_date: self.invoice_date,
            software_id: &self.software_id,
            software_version: &self.software_version,
            developer_id: &self.developer_id,
        }
    }

    /// Computes the record hash and produces the record to commit.
    ///
    /// `created_at` is provisional; the store stamps the commit time.
    pub fn seal(self) -> FiscalAuditRecord {
        let record_hash = hasher::compute_hash(&self.canonical(), &self.previous_hash);
        FiscalAuditRecord {
            fiscal_log_id: self.fiscal_log_id,
            sale_id: self.sale_id,
            store_id: self.store_id,
            device_id: self.device_id,
            event_type: self.event_type,
            chain_sequence: self.chain_sequence,
            invoice_amount: self.invoice_amount,
            invoice_date: self.invoice_date,
            previous_hash: self.previous_hash,
            record_hash,
            software_id: self.software_id,
            software_version: self.software_version,
            developer_id: self.developer_id,
            created_at: Utc::now(),
        }
    }
}

/// One entry of a device's fiscal chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalAuditRecord {
    pub fiscal_log_id: FiscalLogId,
    pub sale_id: SaleId,
    pub store_id: StoreId,
    pub device_id: DeviceId,
    pub event_type: FiscalEventType,
    pub chain_sequence: u64,
    pub invoice_amount: Money,
    pub invoice_date: DateTime<Utc>,
    pub previous_hash: ChainHash,
    pub record_hash: ChainHash,
    pub software_id: String,
    pub software_version: String,
    pub developer_id: String,
    /// Commit time. Informational only, not hashed.
    pub created_at: DateTime<Utc>,
}

impl FiscalAuditRecord {
    /// Borrowed view of the hashed fields.
    pub fn canonical(&self) -> CanonicalRecord<'_> {
        CanonicalRecord {
            chain_sequence: self.chain_sequence,
            device_id: self.device_id,
            store_id: self.store_id,
            sale_id: self.sale_id,
            event_type: self.event_type,
            invoice_amount: self.invoice_amount,
            invoice_date: self.invoice_date,
            software_id: &self.software_id,
            software_version: &self.software_version,
            developer_id: &self.developer_id,
        }
    }

    /// Hash recomputed from the stored fields and stored previous hash.
    pub fn recompute_hash(&self) -> ChainHash {
        hasher::compute_hash(&self.canonical(), &self.previous_hash)
    }

    /// Result reported to the caller for this record.
    pub fn result(&self) -> FiscalizeSaleResult {
        FiscalizeSaleResult {
            fiscal_log_id: self.fiscal_log_id,
            record_hash: self.record_hash,
            chain_sequence: self.chain_sequence,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
