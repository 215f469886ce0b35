//! Dedup ledger: which items were already searched.
//!
//! Suppression is scoped to one global [`Epoch`]. When the epoch expires the
//! whole `processed_ids` table is cleared and a fresh epoch opened inside one
//! transaction, so checks and expiry are both O(1) in the number of tracked
//! items. Presence means "do not search again"; absence does not imply the
//! item was never searched.
//!
//! Reads fail open: an unreachable store reports "not processed" so a
//! possible duplicate search wins over silently skipped work.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{Epoch, ServiceType, from_millis, parse_service_type};

/// Default retention window (one week).
pub const DEFAULT_RETENTION_HOURS: u32 = 168;

/// Longest accepted retention window (ten years).
pub const MAX_RETENTION_HOURS: u32 = 24 * 365 * 10;

/// Number of processed ids for one (service type, instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedCount {
    /// Service type.
    pub service_type: ServiceType,
    /// Instance name.
    pub instance_name: String,
    /// Ids currently suppressed.
    pub count: u64,
}

/// Durable set of already-searched item ids.
#[derive(Clone, Debug)]
pub struct DedupLedger {
    pool: SqlitePool,
    retention_hours: u32,
}

impl DedupLedger {
    /// Create a ledger facade over `pool` with the given retention window.
    pub fn new(pool: SqlitePool, retention_hours: u32) -> Self {
        Self {
            pool,
            retention_hours,
        }
    }

    /// Retention window in hours.
    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    /// Open the first epoch if none exists yet and return the current one.
    pub async fn init(&self) -> Result<Epoch, StorageError> {
        self.init_at(Utc::now()).await
    }

    /// [`init`](Self::init) with an explicit clock.
    pub async fn init_at(&self, now: DateTime<Utc>) -> Result<Epoch, StorageError> {
        let fresh = Epoch::starting_at(now, self.retention_hours);
        sqlx::query(
            "INSERT OR IGNORE INTO ledger_epoch (id, created_at, expires_at) VALUES (1, ?1, ?2)",
        )
        .bind(fresh.created_at.timestamp_millis())
        .bind(fresh.expires_at.timestamp_millis())
        .execute(self.pool.inner())
        .await?;

        self.epoch()
            .await?
            .ok_or_else(|| StorageError::Internal("ledger epoch missing after init".to_string()))
    }

    /// Current epoch, if one has been opened.
    pub async fn epoch(&self) -> Result<Option<Epoch>, StorageError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT created_at, expires_at FROM ledger_epoch WHERE id = 1")
                .fetch_optional(self.pool.inner())
                .await?;

        row.map(|(created, expires)| {
            Ok(Epoch {
                created_at: from_millis(created)?,
                expires_at: from_millis(expires)?,
            })
        })
        .transpose()
    }

    /// Whether `item_id` was already searched on this instance.
    ///
    /// No side effects. Returns `false` when the store cannot be read.
    pub async fn is_processed(
        &self,
        service_type: ServiceType,
        instance: &str,
        item_id: i64,
    ) -> bool {
        match self.try_is_processed(service_type, instance, item_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    service = %service_type,
                    instance = %instance,
                    item_id,
                    error = %e,
                    "Ledger read failed; treating item as unprocessed"
                );
                false
            }
        }
    }

    async fn try_is_processed(
        &self,
        service_type: ServiceType,
        instance: &str,
        item_id: i64,
    ) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM processed_ids
             WHERE service_type = ?1 AND instance_name = ?2 AND item_id = ?3",
        )
        .bind(service_type.as_ref())
        .bind(instance)
        .bind(item_id)
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.is_some())
    }

    /// Record `item_id` as searched.
    ///
    /// Idempotent: returns `true` whenever the id is recorded afterwards,
    /// including when it already was. Returns `false` only if the write failed,
    /// in which case callers must not treat the item as done.
    pub async fn add_processed(
        &self,
        service_type: ServiceType,
        instance: &str,
        item_id: i64,
    ) -> bool {
        self.add_processed_at(service_type, instance, item_id, Utc::now())
            .await
    }

    /// [`add_processed`](Self::add_processed) with an explicit clock.
    pub async fn add_processed_at(
        &self,
        service_type: ServiceType,
        instance: &str,
        item_id: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_ids (service_type, instance_name, item_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(service_type.as_ref())
        .bind(instance)
        .bind(item_id)
        .bind(now.timestamp_millis())
        .execute(self.pool.inner())
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    service = %service_type,
                    instance = %instance,
                    item_id,
                    error = %e,
                    "Ledger write failed"
                );
                false
            }
        }
    }

    /// Forget every processed id and open a new epoch, atomically.
    pub async fn reset_all(&self) -> Result<Epoch, StorageError> {
        self.reset_all_at(Utc::now()).await
    }

    /// [`reset_all`](Self::reset_all) with an explicit clock.
    pub async fn reset_all_at(&self, now: DateTime<Utc>) -> Result<Epoch, StorageError> {
        let fresh = Epoch::starting_at(now, self.retention_hours);
        let mut tx = self.pool.inner().begin().await?;

        let deleted = sqlx::query("DELETE FROM processed_ids")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            "INSERT OR REPLACE INTO ledger_epoch (id, created_at, expires_at) VALUES (1, ?1, ?2)",
        )
        .bind(fresh.created_at.timestamp_millis())
        .bind(fresh.expires_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            deleted,
            expires_at = %fresh.expires_at,
            "Ledger reset; new epoch opened"
        );
        Ok(fresh)
    }

    /// Expire the epoch if it is due.
    ///
    /// Intended to be polled by a scheduler. Returns `true` when a reset
    /// happened. Errors are logged and reported as `false`.
    pub async fn check_expiration(&self) -> bool {
        self.check_expiration_at(Utc::now()).await
    }

    /// [`check_expiration`](Self::check_expiration) with an explicit clock.
    pub async fn check_expiration_at(&self, now: DateTime<Utc>) -> bool {
        match self.try_check_expiration(now).await {
            Ok(reset) => reset,
            Err(e) => {
                tracing::warn!(error = %e, "Ledger expiration check failed");
                false
            }
        }
    }

    async fn try_check_expiration(&self, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let fresh = Epoch::starting_at(now, self.retention_hours);
        let mut tx = self.pool.inner().begin().await?;

        // Writing first takes the database write lock, so concurrent checkers
        // serialize here and only one of them observes the expired row.
        let rolled = sqlx::query(
            "UPDATE ledger_epoch SET created_at = ?1, expires_at = ?2
             WHERE id = 1 AND expires_at <= ?3",
        )
        .bind(fresh.created_at.timestamp_millis())
        .bind(fresh.expires_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rolled == 0 {
            sqlx::query(
                "INSERT OR IGNORE INTO ledger_epoch (id, created_at, expires_at) VALUES (1, ?1, ?2)",
            )
            .bind(fresh.created_at.timestamp_millis())
            .bind(fresh.expires_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(false);
        }

        let deleted = sqlx::query("DELETE FROM processed_ids")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::info!(
            deleted,
            expires_at = %fresh.expires_at,
            "Ledger epoch expired; processed ids cleared"
        );
        Ok(true)
    }

    /// Processed ids grouped per (service type, instance).
    pub async fn processed_counts(&self) -> Result<Vec<ProcessedCount>, StorageError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT service_type, instance_name, COUNT(*) FROM processed_ids
             GROUP BY service_type, instance_name
             ORDER BY service_type, instance_name",
        )
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter()
            .map(|(ty, instance_name, count)| {
                Ok(ProcessedCount {
                    service_type: parse_service_type(&ty)?,
                    instance_name,
                    count: u64::try_from(count).unwrap_or_default(),
                })
            })
            .collect()
    }
}
