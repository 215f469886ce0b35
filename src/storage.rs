//! Storage Layer
//!
//! Crash-safe SQLite state shared by every worker. Each facade owns one
//! logical table set and performs every mutation as a single atomic
//! statement or write-first transaction, so concurrent workers never
//! corrupt a counter.
//!
//! # Components
//!
//! - [`DedupLedger`]: Already-searched item ids scoped to a global [`Epoch`]
//! - [`RateLimiter`]: Per service-type hourly request budget
//! - [`CycleClock`]: Per service-type next-run time and in-flight flag
//! - [`HuntStats`]: Cumulative triggered-search counters
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
mod cycle_clock;
pub mod db;
mod error;
mod ledger;
mod rate_limiter;
mod schema;
mod stats;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use cycle_clock::CycleClock;
pub use error::StorageError;
pub use ledger::{DEFAULT_RETENTION_HOURS, DedupLedger, MAX_RETENTION_HOURS, ProcessedCount};
pub use rate_limiter::{HourlyCounter, RateLimiter, hour_marker};
pub use stats::HuntStats;
pub use types::{CapStatus, CycleState, Epoch, HuntStat, Intent, ServiceType};
