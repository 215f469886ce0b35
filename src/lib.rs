//! Quarry - periodic missing/upgrade search orchestration
//!
//! Drives *arr media-library managers (Sonarr, Radarr, Lidarr, Readarr) to
//! search for missing items and quality upgrades at a controlled pace,
//! without repeating recent searches and without exceeding per-service
//! hourly request budgets. It can be used as a library, or run as a
//! standalone binary with the `quarry` executable.
//!
//! # Architecture
//!
//! - **Storage**: SQLite dedup ledger, hourly rate limiter, cycle clock and hunt statistics
//! - **Adapter**: REST clients for the remote managers
//! - **Worker**: Per service-type hunt loops under a restarting supervisor
//! - **Maintenance**: Scheduled ledger expiration
//! - **Server**: JSON control and inspection API
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quarry::{AdapterRegistry, AppConfig, StaticConfigProvider, StorageBuilder, WorkerSupervisor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_yaml("services:\n  sonarr:\n    url: http://localhost:8989\n    api_key: secret\n")?;
//! let storage = StorageBuilder::new("sqlite::memory:").build().await?;
//! let supervisor = WorkerSupervisor::new(
//!     AdapterRegistry::with_defaults()?,
//!     storage.clone(),
//!     Arc::new(StaticConfigProvider::new(config.clone())),
//!     config.supervisor.clone(),
//! );
//! supervisor.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod maintenance;
pub mod server;
pub mod storage;
pub mod worker;

pub use adapter::{AdapterError, AdapterRegistry, ArrAdapter, ServiceAdapter};
pub use config::{
    AppConfig, ConfigError, ConfigProvider, FileConfigProvider, ServiceConfig,
    StaticConfigProvider,
};
pub use maintenance::{MaintenanceScheduler, Schedule};
pub use storage::{
    CycleClock, DedupLedger, HuntStats, Intent, RateLimiter, ServiceType, StorageBuilder,
    StorageError, StorageHandles,
};
pub use worker::{ServiceWorker, WorkerError, WorkerSupervisor};
