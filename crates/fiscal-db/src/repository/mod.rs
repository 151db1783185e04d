//! # Repository Module
//!
//! SQLite implementations of the fiscal-core storage ports.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  FiscalizationService / ChainVerifier (fiscal-chain)                   │
//! │       │                                                                 │
//! │       │  Arc<dyn FiscalAuditLogStore>, Arc<dyn DeviceDirectory>         │
//! │       ▼                                                                 │
//! │  FiscalAuditLogRepository              DeviceRepository                │
//! │  ├── save (conditional append)         ├── register                    │
//! │  ├── find_last_by_device               ├── set_status                  │
//! │  ├── find_by_sale                      ├── get                         │
//! │  ├── list_by_device                    └── resolve (port)              │
//! │  └── list_devices                                                       │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`FiscalAuditLogRepository`](fiscal_log::FiscalAuditLogRepository) - the append-only chain
//! - [`DeviceRepository`](device::DeviceRepository) - device registrations

pub mod device;
pub mod fiscal_log;
