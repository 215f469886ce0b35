//! Configuration module for quarry.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (url, pool size)
//! - Ledger retention and expiration check schedule
//! - Worker supervision timings
//! - Per service-type instances, search volumes and budgets

mod app;
mod provider;
mod service;
mod validation;

pub use app::{AppConfig, DatabaseConfig, LedgerConfig, ServerConfig, SupervisorConfig};
pub use provider::{ConfigProvider, FileConfigProvider, StaticConfigProvider};
pub use service::{Instance, InstanceConfig, MarkPolicy, SearchOrder, ServiceConfig};
pub use validation::{ConfigError, expand_env_vars, validate_cron};

// Re-export constants
pub use app::{
    DEFAULT_DATABASE_URL, DEFAULT_LEDGER_CHECK_INTERVAL, DEFAULT_RESTART_DELAY,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SUPERVISOR_CHECK_INTERVAL, DEFAULT_TICK,
};
pub use service::{DEFAULT_HOURLY_CAP, DEFAULT_INSTANCE_TIMEOUT, DEFAULT_SLEEP, LEGACY_INSTANCE_NAME};
