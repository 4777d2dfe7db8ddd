//! `adhoc-events`: event records and the collaborator boundaries around them.
//!
//! - [`EventRecord`]: one sequenced entry of an entity stream (JSON payload + type tag)
//! - [`EventLog`]: read-side view of the authoritative per-entity log
//! - [`EventBus`]: pub/sub transport used to deliver the live feed

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod in_memory_log;
pub mod log;
pub mod record;

pub use bus::{EventBus, Subscription};
pub use event::DomainEvent;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use in_memory_log::InMemoryEventLog;
pub use log::{EventLog, EventLogError, EventStream};
pub use record::{EventMeta, EventRecord, FeedMessage};
