//! Adapter Layer
//!
//! Remote catalog clients, one per service type, behind the
//! [`ServiceAdapter`] capability trait.
//!
//! # Architecture
//!
//! - [`ServiceAdapter`]: Connectivity, queue size, catalog pages, search trigger, command status
//! - [`ArrAdapter`]: reqwest implementation of the shared *arr REST dialect
//! - [`AdapterRegistry`]: Compile-time closed mapping from [`ServiceType`](crate::storage::ServiceType) to adapter

mod arr;
mod registry;
mod traits;

pub use arr::{ArrAdapter, ArrFlavor};
pub use registry::AdapterRegistry;
pub use traits::{
    AdapterError, CandidateFilter, CatalogItem, CatalogPage, CommandStatus, ServiceAdapter,
};
