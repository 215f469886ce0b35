//! Worker Layer
//!
//! Long-running per service-type hunt loops and their supervision.
//!
//! # Architecture
//!
//! - [`ServiceWorker`]: Gated hunt cycle over every instance of one service type
//! - [`CandidateSampler`]: Two-request random sampling of a paginated catalog
//! - [`RetryPolicy`]: Bounded fixed-delay retry for remote reads
//! - [`WorkerSupervisor`]: Spawns, monitors and restarts workers; graceful shutdown

mod error;
mod retry;
mod sampler;
mod service_worker;
mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use error::WorkerError;
pub use retry::RetryPolicy;
pub use sampler::{CandidateSampler, DEFAULT_PAGE_SIZE};
pub use service_worker::{
    CONFIG_RETRY_DELAY, CycleReport, InstanceOutcome, InstanceReport, SEQUENTIAL_MAX_PAGES,
    ServiceWorker,
};
pub use supervisor::{WorkerStatus, WorkerSupervisor};
