//! Application configuration structures.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::service::ServiceConfig;
use super::validation::{ConfigError, validate_cron};
use crate::storage::{DEFAULT_RETENTION_HOURS, MAX_RETENTION_HOURS, ServiceType};

// =============================================================================
// Constants
// =============================================================================

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/quarry.db?mode=rwc";

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default ledger expiration check interval (5 minutes).
pub const DEFAULT_LEDGER_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default supervisor liveness check interval (15 seconds).
pub const DEFAULT_SUPERVISOR_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay before a crashed worker is respawned.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Default sleep poll tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default time allowed for workers to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Server Configuration
// =============================================================================

/// Control server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9705).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9705,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL.
    pub url: String,

    /// Connection pool size (default: 5).
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Dedup ledger retention and expiration check schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Hours before every processed id is forgotten (default: 168).
    pub retention_hours: u32,

    /// Fixed check interval. Defaults to 5 minutes when neither this nor
    /// `check_cron` is set.
    #[serde(with = "humantime_serde")]
    pub check_interval: Option<Duration>,

    /// 6-field cron expression for the check.
    pub check_cron: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_RETENTION_HOURS,
            check_interval: None,
            check_cron: None,
        }
    }
}

// =============================================================================
// Supervisor Configuration
// =============================================================================

/// Worker supervision timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Granularity of the inter-cycle sleep poll.
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_SUPERVISOR_CHECK_INTERVAL,
            restart_delay: DEFAULT_RESTART_DELAY,
            tick: DEFAULT_TICK,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Control server configuration.
    pub server: ServerConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Dedup ledger configuration.
    pub ledger: LedgerConfig,

    /// Worker supervision configuration.
    pub supervisor: SupervisorConfig,

    /// Per service-type settings.
    pub services: BTreeMap<ServiceType, ServiceConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Per-instance problems are not reported here; such instances are
    /// skipped when a cycle resolves them.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database url must not be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database max_connections must be positive".to_string(),
            ));
        }

        if self.ledger.retention_hours == 0 {
            return Err(ConfigError::ValidationError(
                "ledger retention_hours must be positive".to_string(),
            ));
        }
        if self.ledger.retention_hours > MAX_RETENTION_HOURS {
            return Err(ConfigError::ValidationError(format!(
                "ledger retention_hours must be at most {MAX_RETENTION_HOURS}"
            )));
        }
        match (&self.ledger.check_interval, &self.ledger.check_cron) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "ledger check_interval and check_cron are mutually exclusive".to_string(),
                ));
            }
            (Some(d), None) if d.is_zero() => {
                return Err(ConfigError::ValidationError(
                    "ledger check_interval must be positive".to_string(),
                ));
            }
            (None, Some(expr)) => validate_cron(expr)?,
            _ => {}
        }

        if self.supervisor.tick.is_zero() || self.supervisor.check_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "supervisor tick and check_interval must be positive".to_string(),
            ));
        }

        for (ty, service) in &self.services {
            if service.sleep.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "services.{ty}.sleep must be positive"
                )));
            }
        }

        Ok(())
    }

    /// Settings of one service type, if configured.
    pub fn service(&self, service_type: ServiceType) -> Option<&ServiceConfig> {
        self.services.get(&service_type)
    }

    /// Service types configured and enabled.
    pub fn enabled_services(&self) -> impl Iterator<Item = ServiceType> + '_ {
        self.services
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(ty, _)| *ty)
    }
}
