//! # fiscal-chain: Sequencing, Fiscalization and Verification
//!
//! Extends per-device fiscal chains and checks them, using only the
//! fiscal-core ports.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fiscal Chain Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  FiscalizationService::execute                    │  │
//! │  │                                                                  │  │
//! │  │  validate → resolve device → allocate → idempotency → commit     │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┴─────────────────────┐                  │
//! │         ▼                                           ▼                   │
//! │  ┌────────────────────────┐              ┌────────────────────────┐    │
//! │  │    ChainSequencer      │              │    ChainVerifier       │    │
//! │  │                        │              │                        │    │
//! │  │ One async mutex per    │              │ Pages a device chain   │    │
//! │  │ device, bounded wait,  │              │ through ChainWalker,   │    │
//! │  │ reads head, hands out  │              │ reports first break    │    │
//! │  │ a ChainSlot            │              │                        │    │
//! │  └───────────┬────────────┘              └───────────┬────────────┘    │
//! │              │                                       │                  │
//! │              ▼                                       ▼                  │
//! │      Arc<dyn FiscalAuditLogStore>  (conditional append, paged reads)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Configuration errors
//! - [`sequencer`] - Per-device critical section and slot allocation
//! - [`service`] - The fiscalize-sale operation
//! - [`verifier`] - Chain verification over a store
//!
//! ## Usage
//! ```rust,ignore
//! let db = fiscal_db::Database::new(DbConfig::new(&config.database.path)).await?;
//! let service = FiscalizationService::new(
//!     Arc::new(db.fiscal_log()),
//!     Arc::new(db.devices()),
//!     config.chain.lock_timeout(),
//! );
//! let result = service.execute(command).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod sequencer;
pub mod service;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ChainSettings, DatabaseSettings, FiscalConfig, SoftwareSettings};
pub use error::{ConfigError, ConfigResult};
pub use sequencer::{ChainSequencer, ChainSlot};
pub use service::FiscalizationService;
pub use verifier::{ChainVerifier, DeviceChainReport};
