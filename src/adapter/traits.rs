//! Core adapter trait and wire-independent types.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::config::Instance;
use crate::storage::{Intent, ServiceType};

/// Errors raised while talking to a remote instance.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Transport or protocol failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote answered with a non-success status.
    #[error("unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    /// Response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Timeout elapsed.
    #[error("timeout elapsed")]
    Timeout,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

/// Lifecycle of a remote command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommandStatus {
    Queued,
    Started,
    Completed,
    Failed,
    Aborted,
    Cancelled,
    Unknown,
}

impl CommandStatus {
    /// Parse a remote status string; unrecognized values map to `Unknown`.
    pub fn from_remote(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Unknown)
    }

    /// Whether the command will not change state any more.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Cancelled
        )
    }
}

/// Which slice of the catalog to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFilter {
    pub intent: Intent,
    pub monitored_only: bool,
}

impl CandidateFilter {
    /// Whether `item` passes the client-side filter.
    pub fn accepts(&self, item: &CatalogItem) -> bool {
        !self.monitored_only || item.monitored
    }
}

/// One catalog record eligible for a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    pub monitored: bool,
}

/// One page of a paginated catalog listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub records: Vec<CatalogItem>,
    /// Size of the whole listing, not of this page.
    pub total_records: u64,
}

/// Capabilities the workers need from one kind of media-library manager.
///
/// Implementations are stateless with respect to instances: every call
/// names the instance it targets. Failures are returned, never retried;
/// retry policy belongs to the caller.
#[async_trait::async_trait]
pub trait ServiceAdapter: Send + Sync + 'static {
    /// Service type served by this adapter.
    fn service_type(&self) -> ServiceType;

    /// Succeeds when the instance is reachable and authenticated.
    async fn check_connection(&self, instance: &Instance) -> Result<(), AdapterError>;

    /// Items currently in the instance's download queue.
    async fn get_queue_size(&self, instance: &Instance) -> Result<u64, AdapterError>;

    /// Read one page (1-based) of the catalog slice selected by `filter`.
    async fn get_candidates(
        &self,
        instance: &Instance,
        page: u32,
        page_size: u32,
        filter: &CandidateFilter,
    ) -> Result<CatalogPage, AdapterError>;

    /// Ask the instance to search for `item_ids`.
    ///
    /// Returns the remote command id, or `None` when the instance accepted
    /// the request without one.
    async fn trigger_search(
        &self,
        instance: &Instance,
        item_ids: &[i64],
    ) -> Result<Option<i64>, AdapterError>;

    /// Current state of a previously triggered command.
    async fn get_command_status(
        &self,
        instance: &Instance,
        command_id: i64,
    ) -> Result<CommandStatus, AdapterError>;
}
