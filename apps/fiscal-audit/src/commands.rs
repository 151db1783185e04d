//! Command handlers. Each prints its result as JSON on stdout.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use fiscal_chain::{
    ChainVerifier, ConfigError, DatabaseSettings, DeviceChainReport, FiscalConfig,
    FiscalizationService,
};
use fiscal_core::{FiscalError, FiscalizeSaleCommand};
use fiscal_db::{Database, DbConfig, DbError};

use crate::cli::{Cli, Command};

/// Everything a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Fiscal(#[from] FiscalError),

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// 75 (temporary failure) when retrying the same invocation may succeed.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Fiscal(e) if e.is_retryable() => 75,
            _ => 1,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Verification found at least one broken chain.
    ChainBroken,
    /// No chain was broken, but at least one could not be read.
    Incomplete,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Done => 0,
            Outcome::Incomplete => 1,
            Outcome::ChainBroken => 3,
        }
    }
}

/// Loads config, opens the database and runs the command.
pub async fn run(cli: Cli) -> Result<Outcome, CliError> {
    let mut config = FiscalConfig::load(cli.config)?;
    if let Some(path) = cli.db {
        config.database.path = path;
    }

    let db = connect(&config.database).await?;
    let result = dispatch(&config, &db, cli.command).await;
    db.close().await;
    result
}

async fn connect(settings: &DatabaseSettings) -> Result<Database, DbError> {
    let db_config = DbConfig::new(&settings.path)
        .max_connections(settings.max_connections)
        .busy_timeout(settings.busy_timeout());
    Database::new(db_config).await
}

pub async fn dispatch(
    config: &FiscalConfig,
    db: &Database,
    command: Command,
) -> Result<Outcome, CliError> {
    match command {
        Command::RegisterDevice {
            device_id,
            store_id,
        } => {
            let context = db.devices().register(device_id, store_id).await?;
            print_json(&context)?;
            Ok(Outcome::Done)
        }

        Command::SetDeviceStatus { device_id, status } => {
            let devices = db.devices();
            devices.set_status(device_id, status).await?;
            print_json(&devices.get(device_id).await?)?;
            Ok(Outcome::Done)
        }

        Command::Fiscalize {
            device_id,
            store_id,
            sale_id,
            amount,
            date,
        } => {
            let service = FiscalizationService::new(
                Arc::new(db.fiscal_log()),
                Arc::new(db.devices()),
                config.chain.lock_timeout(),
            );
            let command = FiscalizeSaleCommand {
                sale_id,
                store_id,
                device_id,
                invoice_amount: amount,
                invoice_date: date.unwrap_or_else(Utc::now),
                software_id: config.software.id.clone(),
                software_version: config.software.version.clone(),
                developer_id: config.software.developer_id.clone(),
            };
            let result = service.execute(command).await?;
            print_json(&result)?;
            Ok(Outcome::Done)
        }

        Command::Verify { device_id } => {
            let verifier =
                ChainVerifier::new(Arc::new(db.fiscal_log()), config.chain.verify_page_size);
            let reports = match device_id {
                Some(device_id) => vec![DeviceChainReport::new(
                    device_id,
                    Ok(verifier.verify_chain(device_id).await?),
                )],
                None => verifier.verify_all().await?,
            };
            print_json(&reports)?;

            let broken = reports.iter().filter(|r| r.is_broken()).count();
            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            info!(chains = reports.len(), broken, failed, "Verification finished");
            Ok(if broken > 0 {
                Outcome::ChainBroken
            } else if failed > 0 {
                Outcome::Incomplete
            } else {
                Outcome::Done
            })
        }

        Command::Head { device_id } => {
            let head = db.fiscal_log().last_for_device(device_id).await?;
            print_json(&head)?;
            Ok(Outcome::Done)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
