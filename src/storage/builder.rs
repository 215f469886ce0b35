//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::path::Path;

use crate::storage::db::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
use crate::storage::ledger::DEFAULT_RETENTION_HOURS;
use crate::storage::schema::init_schema;
use crate::storage::{CycleClock, DedupLedger, HuntStats, RateLimiter, StorageError};

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
    max_connections: u32,
    retention_hours: u32,
}

impl StorageBuilder {
    /// Create a new storage builder for a sqlx SQLite URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }

    /// Set the connection pool size (ignored for in-memory databases).
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the dedup ledger retention window.
    pub fn retention_hours(mut self, hours: u32) -> Self {
        self.retention_hours = hours;
        self
    }

    /// Connect, create the schema, open the first ledger epoch and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(path) = database_file(&self.url)
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&self.url, self.max_connections).await?;
        init_schema(&pool).await?;

        let ledger = DedupLedger::new(pool.clone(), self.retention_hours);
        let epoch = ledger.init().await?;
        tracing::info!(
            retention_hours = self.retention_hours,
            expires_at = %epoch.expires_at,
            "Storage ready"
        );

        Ok(StorageHandles {
            ledger,
            limiter: RateLimiter::new(pool.clone()),
            clock: CycleClock::new(pool.clone()),
            stats: HuntStats::new(pool.clone()),
            pool,
        })
    }
}

/// Handles to all storage layer facades.
#[derive(Clone, Debug)]
pub struct StorageHandles {
    /// Already-searched item ids.
    pub ledger: DedupLedger,
    /// Hourly request budgets.
    pub limiter: RateLimiter,
    /// Per service-type scheduling state.
    pub clock: CycleClock,
    /// Triggered search counters.
    pub stats: HuntStats,
    pool: SqlitePool,
}

impl StorageHandles {
    /// Whether the store answers a trivial query.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }

    /// Gracefully shutdown the storage layer.
    ///
    /// Closes the pool; clones of the facades fail afterwards.
    pub async fn shutdown(self) {
        self.pool.close().await;
        tracing::info!("Storage closed");
    }
}

/// File path component of a SQLite URL, `None` for in-memory databases.
fn database_file(url: &str) -> Option<&str> {
    if url.contains(":memory:") || url.contains("mode=memory") {
        return None;
    }
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty()).then_some(path)
}
