//! Per service-type configuration and instance resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use url::Url;

use super::validation::{ConfigError, expand_env_vars};
use crate::storage::Intent;

/// Default pause between cycles (15 minutes).
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(15 * 60);

/// Default per-request timeout against a remote instance.
pub const DEFAULT_INSTANCE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default hourly search budget per service type.
pub const DEFAULT_HOURLY_CAP: u32 = 20;

/// Name given to the instance synthesized from legacy `url`/`api_key`.
pub const LEGACY_INSTANCE_NAME: &str = "Default";

/// How candidates are picked from the remote catalog.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SearchOrder {
    /// One random page, random subset (large catalogs).
    #[default]
    Random,
    /// Walk pages from the start.
    Sequential,
}

/// When an item is recorded in the dedup ledger.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MarkPolicy {
    /// Only once the remote returned a command id.
    #[default]
    AfterConfirm,
    /// Before the trigger call; a failed trigger stays recorded until the
    /// next epoch.
    BeforeTrigger,
}

/// One configured instance, as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Display name, unique per service type by convention.
    pub name: String,

    /// Base URL; `${VAR}` references are expanded.
    #[serde(default)]
    pub url: String,

    /// API key; `${VAR}` references are expanded.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout override.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A validated, ready to call instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub base_url: Url,
    pub api_key: String,
    pub timeout: Duration,
}

/// Settings for one service type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Whether a worker runs for this service type.
    pub enabled: bool,

    /// Configured instances.
    pub instances: Vec<InstanceConfig>,

    /// Legacy single-instance URL, used only when `instances` is empty.
    pub url: Option<String>,

    /// Legacy single-instance API key.
    pub api_key: Option<String>,

    /// Pause between the end of one cycle and the start of the next.
    #[serde(with = "humantime_serde")]
    pub sleep: Duration,

    /// Default request timeout for instances without their own.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Search-triggering requests allowed per clock hour.
    pub hourly_cap: u32,

    /// Missing items to search per instance and cycle (0 disables).
    pub missing_items: u32,

    /// Quality upgrades to search per instance and cycle (0 disables).
    pub upgrade_items: u32,

    /// Skip an instance whose download queue holds at least this many items.
    pub queue_limit: Option<u64>,

    /// Ignore unmonitored items.
    pub monitored_only: bool,

    pub search_order: SearchOrder,

    pub mark_policy: MarkPolicy,

    /// Interval between command status polls.
    #[serde(with = "humantime_serde")]
    pub command_wait_delay: Duration,

    /// Status polls per triggered command (0 disables polling).
    pub command_wait_attempts: u32,

    /// Attempts for catalog reads before giving up for the cycle.
    pub retry_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instances: Vec::new(),
            url: None,
            api_key: None,
            sleep: DEFAULT_SLEEP,
            timeout: DEFAULT_INSTANCE_TIMEOUT,
            hourly_cap: DEFAULT_HOURLY_CAP,
            missing_items: 1,
            upgrade_items: 0,
            queue_limit: None,
            monitored_only: true,
            search_order: SearchOrder::Random,
            mark_policy: MarkPolicy::AfterConfirm,
            command_wait_delay: Duration::from_secs(1),
            command_wait_attempts: 0,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl ServiceConfig {
    /// Items to search per instance and cycle for `intent`.
    pub fn volume(&self, intent: Intent) -> u32 {
        match intent {
            Intent::Missing => self.missing_items,
            Intent::Upgrade => self.upgrade_items,
        }
    }

    /// Resolve enabled, well-formed instances.
    ///
    /// Falls back to the legacy `url`/`api_key` pair when no instance list
    /// is configured. Instances missing a URL or key, or with a malformed
    /// URL, are skipped with a warning; instance name uniqueness is not
    /// checked.
    pub fn resolve_instances(&self) -> Vec<Instance> {
        let legacy;
        let configured: &[InstanceConfig] = if self.instances.is_empty() {
            match (&self.url, &self.api_key) {
                (Some(url), Some(api_key)) => {
                    legacy = [InstanceConfig {
                        name: LEGACY_INSTANCE_NAME.to_string(),
                        url: url.clone(),
                        api_key: api_key.clone(),
                        timeout: None,
                        enabled: true,
                    }];
                    &legacy
                }
                _ => &[],
            }
        } else {
            &self.instances
        };

        configured
            .iter()
            .filter(|i| i.enabled)
            .filter_map(|i| match self.resolve(i) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    tracing::warn!(instance = %i.name, error = %e, "Skipping misconfigured instance");
                    None
                }
            })
            .collect()
    }

    fn resolve(&self, raw: &InstanceConfig) -> Result<Instance, ConfigError> {
        let url = expand_env_vars(raw.url.trim());
        let api_key = expand_env_vars(raw.api_key.trim());

        if url.is_empty() {
            return Err(ConfigError::ValidationError("missing url".to_string()));
        }
        if api_key.is_empty() {
            return Err(ConfigError::ValidationError("missing api_key".to_string()));
        }

        let base_url = Url::parse(&url)
            .map_err(|e| ConfigError::ValidationError(format!("invalid url '{url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "unsupported url scheme '{}'",
                base_url.scheme()
            )));
        }

        Ok(Instance {
            name: raw.name.clone(),
            base_url,
            api_key,
            timeout: raw.timeout.unwrap_or(self.timeout),
        })
    }
}

fn default_true() -> bool {
    true
}
