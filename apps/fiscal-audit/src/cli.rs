//! Command-line parsing.
//!
//! Usage errors exit with code 2, `--help` with 0 (clap's defaults).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use fiscal_core::{DeviceId, DeviceStatus, Money, SaleId, StoreId};

/// Fiscal Audit Chain operator tool.
///
/// Results are printed as JSON on stdout; logs go to stderr.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "fiscal-audit",
    version,
    about,
    after_help = "Exit codes: 0 ok, 1 error, 2 usage, 3 broken chain, 75 retryable conflict"
)]
pub struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(short, long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register a device as active in a store
    RegisterDevice {
        #[arg(long = "device", value_name = "ID")]
        device_id: DeviceId,
        #[arg(long = "store", value_name = "ID")]
        store_id: StoreId,
    },

    /// Change a registered device's status
    SetDeviceStatus {
        #[arg(long = "device", value_name = "ID")]
        device_id: DeviceId,
        /// active, inactive or suspended
        #[arg(long)]
        status: DeviceStatus,
    },

    /// Append a sale to its device's chain
    Fiscalize {
        #[arg(long = "device", value_name = "ID")]
        device_id: DeviceId,
        #[arg(long = "store", value_name = "ID")]
        store_id: StoreId,
        #[arg(long = "sale", value_name = "ID")]
        sale_id: SaleId,
        /// Invoice total, e.g. 19.99 or -5.50
        #[arg(long, value_name = "D.DD", allow_negative_numbers = true)]
        amount: Money,
        /// RFC 3339 invoice date; defaults to now
        #[arg(long, value_name = "RFC3339")]
        date: Option<DateTime<Utc>>,
    },

    /// Verify one device's chain, or every chain
    Verify {
        #[arg(long = "device", value_name = "ID")]
        device_id: Option<DeviceId>,
    },

    /// Print a device's last record
    Head {
        #[arg(long = "device", value_name = "ID")]
        device_id: DeviceId,
    },
}
