//! # Device Repository
//!
//! Device registrations, and the [`DeviceDirectory`] port on top of them.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use fiscal_core::{DeviceContext, DeviceDirectory, DeviceId, DeviceStatus, StoreId, StoreResult};

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    id: String,
    store_id: String,
    status: DeviceStatus,
}

impl DeviceRow {
    fn into_context(self) -> DbResult<DeviceContext> {
        Ok(DeviceContext {
            device_id: self.id.parse().map_err(|e| DbError::decode("id", e))?,
            store_id: self.store_id.parse().map_err(|e| DbError::decode("store_id", e))?,
            status: self.status,
        })
    }
}

/// Repository for device registrations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Registers an active device to a store.
    ///
    /// Fails with `UniqueViolation` if the device is already registered.
    pub async fn register(&self, device_id: DeviceId, store_id: StoreId) -> DbResult<DeviceContext> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO devices (id, store_id, status, registered_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(device_id.to_string())
        .bind(store_id.to_string())
        .bind(DeviceStatus::Active)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("device", device_id.to_string()),
            other => other,
        })?;

        info!(device_id = %device_id, store_id = %store_id, "Device registered");

        Ok(DeviceContext {
            device_id,
            store_id,
            status: DeviceStatus::Active,
        })
    }

    /// Changes a device's status.
    pub async fn set_status(&self, device_id: DeviceId, status: DeviceStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE devices SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(device_id.to_string())
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", device_id.to_string()));
        }

        info!(device_id = %device_id, status = %status, "Device status changed");
        Ok(())
    }

    /// Gets a device registration.
    pub async fn get(&self, device_id: DeviceId) -> DbResult<Option<DeviceContext>> {
        debug!(device_id = %device_id, "Looking up device");

        let row: Option<DeviceRow> =
            sqlx::query_as("SELECT id, store_id, status FROM devices WHERE id = ?1")
                .bind(device_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(DeviceRow::into_context).transpose()
    }
}

#[async_trait]
impl DeviceDirectory for DeviceRepository {
    async fn resolve(&self, device_id: DeviceId) -> StoreResult<Option<DeviceContext>> {
        Ok(self.get(device_id).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
