//! Core data types for the storage layer.
//!
//! - [`ServiceType`]: closed set of supported media-library managers
//! - [`Intent`]: remediation category (missing vs. quality upgrade)
//! - [`Epoch`]: current validity window of the dedup ledger
//! - [`CapStatus`]: hourly request budget snapshot
//! - [`CycleState`]: per service-type scheduling state
//! - [`HuntStat`]: cumulative per-intent search counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::storage::StorageError;

/// Kind of target media-library manager.
///
/// Each variant owns exactly one adapter in the
/// [`AdapterRegistry`](crate::adapter::AdapterRegistry).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ServiceType {
    /// Episodic catalog manager.
    Sonarr,
    /// Movie catalog manager.
    Radarr,
    /// Music catalog manager.
    Lidarr,
    /// Book catalog manager.
    Readarr,
}

/// Remediation category for a search.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Intent {
    /// Item has no file at all.
    Missing,
    /// Item has a file below the quality cutoff.
    Upgrade,
}

/// Validity window of the dedup ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// When the window opened.
    pub created_at: DateTime<Utc>,
    /// When every processed id is forgotten.
    pub expires_at: DateTime<Utc>,
}

impl Epoch {
    /// Build an epoch starting at `now` lasting `retention_hours`.
    pub fn starting_at(now: DateTime<Utc>, retention_hours: u32) -> Self {
        Self {
            created_at: now,
            expires_at: now
                .checked_add_signed(chrono::Duration::hours(i64::from(retention_hours)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the window is over at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of a service-type's hourly request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapStatus {
    /// Searches issued in the current clock hour.
    pub used: u32,
    /// Configured budget.
    pub limit: u32,
    /// `limit - used`, floored at zero.
    pub remaining: u32,
    /// `used >= limit`.
    pub exceeded: bool,
}

impl CapStatus {
    /// Derive the status from the stored count and the configured limit.
    pub fn new(used: u32, limit: u32) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            exceeded: used >= limit,
        }
    }
}

/// Scheduling state of one service-type's worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    /// Service type this state belongs to.
    pub service_type: ServiceType,
    /// When the next cycle becomes due.
    pub next_run_at: DateTime<Utc>,
    /// Whether a cycle is in flight.
    pub running: bool,
    /// Start of the most recent cycle.
    pub last_started_at: Option<DateTime<Utc>>,
    /// End of the most recent cycle.
    pub last_ended_at: Option<DateTime<Utc>>,
}

impl CycleState {
    /// Idle and due at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.running && now >= self.next_run_at
    }
}

/// Cumulative count of triggered searches for one (service-type, intent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntStat {
    /// Service type.
    pub service_type: ServiceType,
    /// Intent.
    pub intent: Intent,
    /// Searches triggered since the last reset.
    pub hunted: u64,
    /// Last time the counter moved.
    pub updated_at: DateTime<Utc>,
}

/// Convert stored Unix millis back into a timestamp.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {ms}")))
}

/// Parse a stored service type column.
pub(crate) fn parse_service_type(raw: &str) -> Result<ServiceType, StorageError> {
    raw.parse()
        .map_err(|_| StorageError::InvalidData(format!("unknown service type: {raw}")))
}
