//! # fiscal-core: Pure Fiscal Record Logic
//!
//! This crate owns everything about a fiscal audit record that can be decided
//! without touching a database, a lock or a clock-driven timer.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Fiscal Audit Chain Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/fiscal-audit (operator CLI)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   fiscal-chain: ChainSequencer, FiscalizationService, Verifier  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ ports                                  │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fiscal-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  hasher   │  │   chain   │  │   port    │  │   │
//! │  │   │  Record   │  │ canonical │  │  walker   │  │  store    │  │   │
//! │  │   │  Command  │  │  SHA-256  │  │  breaks   │  │ directory │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO LOCKS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                ▲                                        │
//! │  ┌─────────────────────────────┴───────────────────────────────────┐   │
//! │  │           fiscal-db: SQLite adapters implementing the ports     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifiers, records, commands and results
//! - [`money`] - Fixed two-decimal amounts stored as integer cents
//! - [`hasher`] - Canonical form v1 and the SHA-256 chain link
//! - [`chain`] - Pure chain walker used by verification
//! - [`port`] - Storage and device directory traits
//! - [`validation`] - Command validation rules
//! - [`error`] - Error taxonomy
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use fiscal_core::{hasher, ChainHash, FiscalizeSaleCommand, Money, PendingRecord};
//! use fiscal_core::{DeviceId, SaleId, StoreId};
//!
//! let command = FiscalizeSaleCommand {
//!     sale_id: SaleId::generate(),
//!     store_id: StoreId::generate(),
//!     device_id: DeviceId::generate(),
//!     invoice_amount: Money::from_cents(1999),
//!     invoice_date: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
//!     software_id: "POS-1".to_string(),
//!     software_version: "1.0.0".to_string(),
//!     developer_id: "B00000000".to_string(),
//! };
//!
//! let first = PendingRecord::from_command(&command, 1, ChainHash::GENESIS).seal();
//! assert_eq!(first.previous_hash, ChainHash::GENESIS);
//! assert_eq!(first.record_hash, hasher::compute_hash(&first.canonical(), &ChainHash::GENESIS));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod chain;
pub mod error;
pub mod hasher;
pub mod money;
pub mod port;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use chain::{ChainBreak, ChainVerification, ChainWalker};
pub use error::{FiscalError, FiscalResult, StoreError, StoreResult, ValidationError};
pub use money::Money;
pub use port::{DeviceDirectory, FiscalAuditLogStore};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length, in characters, of `software_id`, `software_version` and
/// `developer_id`.
pub const MAX_PROVENANCE_LEN: usize = 100;

/// First header line of the canonical form. Bumping it changes every hash.
pub const CANONICAL_VERSION: &str = "fiscal-record/v1";
