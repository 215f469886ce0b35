//! Hourly request budget per service type.
//!
//! The counter resets lazily: every access compares the stored hour marker
//! with the current clock hour and zeroes the count on mismatch before
//! applying the operation. No timer is involved. The limit itself is
//! configuration supplied by the caller, never stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{CapStatus, ServiceType};

/// Raw stored counter for one service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyCounter {
    /// Requests counted in `hour_marker`.
    pub hits: u32,
    /// Hours since the Unix epoch the count belongs to.
    pub hour_marker: i64,
}

/// Clock hour index used as the counter's marker.
pub fn hour_marker(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(3600)
}

/// Durable per service-type hourly request counter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    pool: SqlitePool,
}

impl RateLimiter {
    /// Create a limiter facade over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Count `count` search-triggering requests against the current hour.
    ///
    /// Returns the updated count. Call only after the remote request was
    /// confirmed.
    pub async fn increment(
        &self,
        service_type: ServiceType,
        count: u32,
    ) -> Result<u32, StorageError> {
        self.increment_at(service_type, count, Utc::now()).await
    }

    /// [`increment`](Self::increment) with an explicit clock.
    pub async fn increment_at(
        &self,
        service_type: ServiceType,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let (hits,): (i64,) = sqlx::query_as(
            "INSERT INTO hourly_caps (service_type, hits, hour_marker) VALUES (?1, ?2, ?3)
             ON CONFLICT (service_type) DO UPDATE SET
                 hits = CASE WHEN hourly_caps.hour_marker = excluded.hour_marker
                             THEN hourly_caps.hits + excluded.hits
                             ELSE excluded.hits END,
                 hour_marker = excluded.hour_marker
             RETURNING hits",
        )
        .bind(service_type.as_ref())
        .bind(i64::from(count))
        .bind(hour_marker(now))
        .fetch_one(self.pool.inner())
        .await?;

        let hits = to_hits(hits);
        tracing::debug!(service = %service_type, hits, "Hourly cap incremented");
        Ok(hits)
    }

    /// Budget snapshot against `limit`.
    ///
    /// Fails open: when the store cannot be read the budget is reported as
    /// untouched.
    pub async fn status(&self, service_type: ServiceType, limit: u32) -> CapStatus {
        self.status_at(service_type, limit, Utc::now()).await
    }

    /// [`status`](Self::status) with an explicit clock.
    pub async fn status_at(
        &self,
        service_type: ServiceType,
        limit: u32,
        now: DateTime<Utc>,
    ) -> CapStatus {
        match self.try_used_at(service_type, now).await {
            Ok(used) => CapStatus::new(used, limit),
            Err(e) => {
                tracing::warn!(
                    service = %service_type,
                    error = %e,
                    "Hourly cap read failed; assuming budget available"
                );
                CapStatus::new(0, limit)
            }
        }
    }

    /// Whether the hourly budget is spent.
    pub async fn is_exceeded(&self, service_type: ServiceType, limit: u32) -> bool {
        self.status(service_type, limit).await.exceeded
    }

    async fn try_used_at(
        &self,
        service_type: ServiceType,
        now: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let marker = hour_marker(now);

        sqlx::query(
            "UPDATE hourly_caps SET hits = 0, hour_marker = ?2
             WHERE service_type = ?1 AND hour_marker != ?2",
        )
        .bind(service_type.as_ref())
        .bind(marker)
        .execute(self.pool.inner())
        .await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT hits FROM hourly_caps WHERE service_type = ?1")
                .bind(service_type.as_ref())
                .fetch_optional(self.pool.inner())
                .await?;

        Ok(row.map(|(hits,)| to_hits(hits)).unwrap_or(0))
    }

    /// Stored counter without applying the hour rollover.
    pub async fn counter(
        &self,
        service_type: ServiceType,
    ) -> Result<Option<HourlyCounter>, StorageError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT hits, hour_marker FROM hourly_caps WHERE service_type = ?1")
                .bind(service_type.as_ref())
                .fetch_optional(self.pool.inner())
                .await?;

        Ok(row.map(|(hits, hour_marker)| HourlyCounter {
            hits: to_hits(hits),
            hour_marker,
        }))
    }
}

fn to_hits(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}
