//! Ad-hoc projections: read models materialized on demand from an entity's
//! event stream, cached, and kept current from the live feed.
//!
//! - [`DispatchRegistry`]: which event builds or updates which projection state
//! - [`ProjectionCache`]: pluggable cache of materialized states ([`CachePolicy`])
//! - [`Repository`]: query path (cache hit, catch-up, or cold build)
//! - [`IncrementalUpdater`]: applies single live records to cached entries
//! - [`FanoutDispatcher`] / [`FeedWorker`]: deliver the live feed to updaters
//!
//! Read models are disposable; the event log stays the source of truth.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod repository;
pub mod updater;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, CachePolicy, LruCache, NoCache, ProjectionCache, UnboundedCache};
pub use config::RepositoryConfig;
pub use dispatcher::{FanoutDispatcher, LiveEventHandler};
pub use error::{DispatchError, OperationKind, PayloadDecodeError, RegistryError, RepositoryError};
pub use registry::{Constructor, DispatchRegistry, RegistryBuilder, UpdateConvention, Updater};
pub use repository::Repository;
pub use updater::{IncrementalUpdater, ModelListener};
pub use worker::{FeedWorker, WorkerError, WorkerHandle, partition_for};
