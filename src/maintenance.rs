//! Periodic ledger maintenance.
//!
//! Runs [`DedupLedger::check_expiration`] on a fixed interval or a cron
//! schedule via `tokio-cron-scheduler`. Expiration is also checked by the
//! scheduler's owner at startup so a ledger that expired while the process
//! was down is cleared before the first cycle.

use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::{ConfigError, DEFAULT_LEDGER_CHECK_INTERVAL, LedgerConfig, validate_cron};
use crate::storage::DedupLedger;
use crate::worker::WorkerError;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// When the expiration check runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval, clamped to at least one second.
    Interval(Duration),

    /// 6-field cron expression (`sec min hour day month weekday`).
    Cron(String),
}

impl Schedule {
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule, validating the expression.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, ConfigError> {
        let expr = expr.as_ref();
        validate_cron(expr)?;
        Ok(Self::Cron(expr.to_string()))
    }

    /// Cron wins over interval; neither means the default interval.
    pub fn from_ledger(config: &LedgerConfig) -> Result<Self, ConfigError> {
        match (&config.check_cron, config.check_interval) {
            (Some(expr), _) => Self::cron(expr),
            (None, Some(interval)) => Ok(Self::interval(interval)),
            (None, None) => Ok(Self::interval(DEFAULT_LEDGER_CHECK_INTERVAL)),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// Scheduled ledger expiration checks.
pub struct MaintenanceScheduler {
    scheduler: JobScheduler,
    ledger: DedupLedger,
    schedule: Schedule,
    job_id: uuid::Uuid,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("schedule", &self.schedule)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl MaintenanceScheduler {
    /// Create the scheduler and register the expiration job. Not started.
    pub async fn new(ledger: DedupLedger, schedule: Schedule) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| WorkerError::Scheduler(e.to_string()))?;

        let job = expiration_job(ledger.clone(), &schedule)?;
        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| WorkerError::Scheduler(e.to_string()))?;

        tracing::info!(schedule = %schedule, job_id = %job_id, "Ledger expiration job registered");
        Ok(Self {
            scheduler,
            ledger,
            schedule,
            job_id,
        })
    }

    /// Run one check immediately, then start the scheduler.
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.ledger.check_expiration().await;
        self.scheduler
            .start()
            .await
            .map_err(|e| WorkerError::Scheduler(e.to_string()))?;
        tracing::info!("Maintenance scheduler started");
        Ok(())
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn job_id(&self) -> uuid::Uuid {
        self.job_id
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout. A timeout is logged, not an error.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), WorkerError> {
        match tokio::time::timeout(timeout, self.scheduler.shutdown()).await {
            Ok(Ok(())) => {
                tracing::info!("Maintenance scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(WorkerError::Scheduler(e.to_string())),
            Err(_) => {
                tracing::warn!("Maintenance scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

fn expiration_job(ledger: DedupLedger, schedule: &Schedule) -> Result<Job, WorkerError> {
    let callback = move |_: uuid::Uuid, _: JobScheduler| {
        let ledger = ledger.clone();
        Box::pin(async move {
            if ledger.check_expiration().await {
                tracing::info!("Dedup ledger epoch rolled over");
            } else {
                tracing::trace!("Dedup ledger epoch still valid");
            }
        }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), callback),
    }
    .map_err(|e| WorkerError::Scheduler(e.to_string()))
}
