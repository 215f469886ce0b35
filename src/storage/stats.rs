//! Cumulative hunt counters per (service type, intent).

use chrono::{DateTime, Utc};

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{HuntStat, Intent, ServiceType, from_millis, parse_service_type};

/// Counters of searches actually triggered.
#[derive(Clone, Debug)]
pub struct HuntStats {
    pool: SqlitePool,
}

impl HuntStats {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add `count` triggered searches and return the new total.
    pub async fn record(
        &self,
        service_type: ServiceType,
        intent: Intent,
        count: u64,
    ) -> Result<u64, StorageError> {
        self.record_at(service_type, intent, count, Utc::now()).await
    }

    /// [`record`](Self::record) with an explicit clock.
    pub async fn record_at(
        &self,
        service_type: ServiceType,
        intent: Intent,
        count: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let count = i64::try_from(count)
            .map_err(|_| StorageError::InvalidData(format!("hunt count too large: {count}")))?;

        let (hunted,): (i64,) = sqlx::query_as(
            "INSERT INTO hunt_stats (service_type, intent, hunted, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (service_type, intent) DO UPDATE SET
                 hunted = hunt_stats.hunted + excluded.hunted,
                 updated_at = excluded.updated_at
             RETURNING hunted",
        )
        .bind(service_type.as_ref())
        .bind(intent.as_ref())
        .bind(count)
        .bind(now.timestamp_millis())
        .fetch_one(self.pool.inner())
        .await?;

        Ok(u64::try_from(hunted).unwrap_or_default())
    }

    /// All counters, ordered by service type then intent.
    pub async fn list(&self) -> Result<Vec<HuntStat>, StorageError> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT service_type, intent, hunted, updated_at FROM hunt_stats
             ORDER BY service_type, intent",
        )
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter()
            .map(|(ty, intent, hunted, updated_at)| {
                Ok(HuntStat {
                    service_type: parse_service_type(&ty)?,
                    intent: intent
                        .parse()
                        .map_err(|_| StorageError::InvalidData(format!("unknown intent: {intent}")))?,
                    hunted: u64::try_from(hunted).unwrap_or_default(),
                    updated_at: from_millis(updated_at)?,
                })
            })
            .collect()
    }

    /// Drop every counter. Returns the number of rows removed.
    pub async fn reset(&self) -> Result<u64, StorageError> {
        let removed = sqlx::query("DELETE FROM hunt_stats")
            .execute(self.pool.inner())
            .await?
            .rows_affected();

        tracing::info!(removed, "Hunt statistics reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::init_schema;

    async fn stats() -> HuntStats {
        let pool = SqlitePool::connect("sqlite::memory:", 1).await.unwrap();
        init_schema(&pool).await.unwrap();
        HuntStats::new(pool)
    }

    #[tokio::test]
    async fn test_record_accumulates() {
        let stats = stats().await;
        assert_eq!(
            stats.record(ServiceType::Sonarr, Intent::Missing, 2).await.unwrap(),
            2
        );
        assert_eq!(
            stats.record(ServiceType::Sonarr, Intent::Missing, 3).await.unwrap(),
            5
        );
        assert_eq!(
            stats.record(ServiceType::Sonarr, Intent::Upgrade, 1).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_and_reset() {
        let stats = stats().await;
        stats.record(ServiceType::Radarr, Intent::Upgrade, 4).await.unwrap();
        stats.record(ServiceType::Lidarr, Intent::Missing, 1).await.unwrap();

        let all = stats.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].service_type, ServiceType::Lidarr);
        assert_eq!(all[1].intent, Intent::Upgrade);
        assert_eq!(all[1].hunted, 4);

        assert_eq!(stats.reset().await.unwrap(), 2);
        assert!(stats.list().await.unwrap().is_empty());
    }
}
