//! Database schema definitions.
//!
//! Four independent logical tables back the engine (processed ids, epoch,
//! hourly caps, cycle state) plus the hunt statistics counters. All
//! timestamps are Unix milliseconds.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// Items already searched, per (service type, instance).
pub const PROCESSED_IDS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_ids (
    service_type  TEXT    NOT NULL,
    instance_name TEXT    NOT NULL,
    item_id       INTEGER NOT NULL,
    created_at    INTEGER NOT NULL,
    PRIMARY KEY (service_type, instance_name, item_id)
)
"#;

/// Ordered by age per service type so expiry can later sweep incrementally.
pub const PROCESSED_IDS_CREATED_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_processed_ids_created
    ON processed_ids (service_type, created_at)
"#;

/// Singleton ledger epoch row.
pub const LEDGER_EPOCH_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_epoch (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)
"#;

/// Per service-type hourly request counter.
pub const HOURLY_CAPS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS hourly_caps (
    service_type TEXT    PRIMARY KEY,
    hits         INTEGER NOT NULL DEFAULT 0,
    hour_marker  INTEGER NOT NULL
)
"#;

/// Per service-type scheduling state.
pub const CYCLE_STATE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cycle_state (
    service_type    TEXT    PRIMARY KEY,
    next_run_at     INTEGER NOT NULL,
    running         INTEGER NOT NULL DEFAULT 0,
    last_started_at INTEGER,
    last_ended_at   INTEGER
)
"#;

/// Cumulative triggered-search counters.
pub const HUNT_STATS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS hunt_stats (
    service_type TEXT    NOT NULL,
    intent       TEXT    NOT NULL,
    hunted       INTEGER NOT NULL DEFAULT 0,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (service_type, intent)
)
"#;

const ALL_DDL: [&str; 6] = [
    PROCESSED_IDS_TABLE_DDL,
    PROCESSED_IDS_CREATED_INDEX_DDL,
    LEDGER_EPOCH_TABLE_DDL,
    HOURLY_CAPS_TABLE_DDL,
    CYCLE_STATE_TABLE_DDL,
    HUNT_STATS_TABLE_DDL,
];

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for ddl in ALL_DDL {
        sqlx::query(ddl).execute(pool.inner()).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
