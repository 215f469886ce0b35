//! Per service-type cycle clock.
//!
//! State machine: `Idle(next_run_at) -> Running -> Idle(next_run_at')`.
//! [`CycleClock::force_reset`] moves any state to `Idle(now)` so a sleeping
//! worker treats its next cycle as already due.

use chrono::{DateTime, Utc};

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{CycleState, ServiceType, from_millis, parse_service_type};

type CycleRow = (String, i64, i64, Option<i64>, Option<i64>);

const SELECT_COLUMNS: &str =
    "SELECT service_type, next_run_at, running, last_started_at, last_ended_at FROM cycle_state";

/// Durable scheduling state for every worker.
#[derive(Clone, Debug)]
pub struct CycleClock {
    pool: SqlitePool,
}

impl CycleClock {
    /// Create a clock facade over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the state on first worker start, due immediately.
    ///
    /// An existing row keeps its `next_run_at`; a stale `running` flag left by
    /// a crashed worker is cleared.
    pub async fn ensure(&self, service_type: ServiceType) -> Result<CycleState, StorageError> {
        self.ensure_at(service_type, Utc::now()).await
    }

    /// [`ensure`](Self::ensure) with an explicit clock.
    pub async fn ensure_at(
        &self,
        service_type: ServiceType,
        now: DateTime<Utc>,
    ) -> Result<CycleState, StorageError> {
        sqlx::query(
            "INSERT INTO cycle_state (service_type, next_run_at, running) VALUES (?1, ?2, 0)
             ON CONFLICT (service_type) DO UPDATE SET running = 0",
        )
        .bind(service_type.as_ref())
        .bind(now.timestamp_millis())
        .execute(self.pool.inner())
        .await?;

        self.require(service_type).await
    }

    /// `Idle -> Running`, recording the start time.
    pub async fn start_cycle(&self, service_type: ServiceType) -> Result<(), StorageError> {
        self.start_cycle_at(service_type, Utc::now()).await
    }

    /// [`start_cycle`](Self::start_cycle) with an explicit clock.
    pub async fn start_cycle_at(
        &self,
        service_type: ServiceType,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO cycle_state (service_type, next_run_at, running, last_started_at)
             VALUES (?1, ?2, 1, ?2)
             ON CONFLICT (service_type) DO UPDATE SET
                 running = 1,
                 last_started_at = excluded.last_started_at",
        )
        .bind(service_type.as_ref())
        .bind(now.timestamp_millis())
        .execute(self.pool.inner())
        .await?;

        tracing::debug!(service = %service_type, "Cycle started");
        Ok(())
    }

    /// `Running -> Idle(next_run_at)`, recording the end time.
    pub async fn end_cycle(
        &self,
        service_type: ServiceType,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.end_cycle_at(service_type, next_run_at, Utc::now()).await
    }

    /// [`end_cycle`](Self::end_cycle) with an explicit clock.
    pub async fn end_cycle_at(
        &self,
        service_type: ServiceType,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO cycle_state (service_type, next_run_at, running, last_ended_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT (service_type) DO UPDATE SET
                 next_run_at = excluded.next_run_at,
                 running = 0,
                 last_ended_at = excluded.last_ended_at",
        )
        .bind(service_type.as_ref())
        .bind(next_run_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(self.pool.inner())
        .await?;

        tracing::debug!(service = %service_type, next_run_at = %next_run_at, "Cycle ended");
        Ok(())
    }

    /// Any state -> `Idle(now)`.
    pub async fn force_reset(&self, service_type: ServiceType) -> Result<CycleState, StorageError> {
        self.force_reset_at(service_type, Utc::now()).await
    }

    /// [`force_reset`](Self::force_reset) with an explicit clock.
    pub async fn force_reset_at(
        &self,
        service_type: ServiceType,
        now: DateTime<Utc>,
    ) -> Result<CycleState, StorageError> {
        sqlx::query(
            "INSERT INTO cycle_state (service_type, next_run_at, running) VALUES (?1, ?2, 0)
             ON CONFLICT (service_type) DO UPDATE SET
                 next_run_at = excluded.next_run_at,
                 running = 0",
        )
        .bind(service_type.as_ref())
        .bind(now.timestamp_millis())
        .execute(self.pool.inner())
        .await?;

        tracing::info!(service = %service_type, "Cycle force-reset; next run is due now");
        self.require(service_type).await
    }

    /// State for one service type, if a worker ever started.
    pub async fn get(&self, service_type: ServiceType) -> Result<Option<CycleState>, StorageError> {
        let row: Option<CycleRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE service_type = ?1"))
            .bind(service_type.as_ref())
            .fetch_optional(self.pool.inner())
            .await?;

        row.map(decode_row).transpose()
    }

    /// Every known cycle state, ordered by service type.
    pub async fn list(&self) -> Result<Vec<CycleState>, StorageError> {
        let rows: Vec<CycleRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY service_type"))
            .fetch_all(self.pool.inner())
            .await?;

        rows.into_iter().map(decode_row).collect()
    }

    async fn require(&self, service_type: ServiceType) -> Result<CycleState, StorageError> {
        self.get(service_type).await?.ok_or_else(|| {
            StorageError::Internal(format!("cycle state for {service_type} vanished"))
        })
    }
}

fn decode_row(
    (service_type, next_run_at, running, started, ended): CycleRow,
) -> Result<CycleState, StorageError> {
    Ok(CycleState {
        service_type: parse_service_type(&service_type)?,
        next_run_at: from_millis(next_run_at)?,
        running: running != 0,
        last_started_at: started.map(from_millis).transpose()?,
        last_ended_at: ended.map(from_millis).transpose()?,
    })
}
