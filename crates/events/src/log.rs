//! Read-side boundary to the authoritative, append-only event log.

use std::sync::Arc;

use thiserror::Error;

use adhoc_core::EntityId;

use crate::EventRecord;

/// Ordered, lazily consumed sequence of records for one entity.
///
/// Callers wrap it in [`Iterator::peekable`] when they need to look at the first
/// record before deciding whether to consume it.
pub type EventStream<'a> = Box<dyn Iterator<Item = EventRecord> + Send + 'a>;

/// Event log operation error.
///
/// These are collaborator failures (storage, locking, misuse of the append
/// API), never projection errors.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log lock poisoned")]
    Poisoned,

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event log backend failure: {0}")]
    Backend(String),
}

/// Append-only, per-entity event log as seen by the projection engine.
///
/// Implementations must:
/// - return records ordered by `sequence_number`
/// - never rewrite history (the tail only grows)
/// - return an empty stream / `None` tail for unknown entities
pub trait EventLog: Send + Sync {
    /// Read the stream of `entity_id` starting at `from_seq` (inclusive).
    fn read_from(&self, entity_id: &EntityId, from_seq: u64)
    -> Result<EventStream<'_>, EventLogError>;

    /// Read the stream starting at the log's latest snapshot point.
    ///
    /// Logs without snapshots start at the origin.
    fn read_from_snapshot(&self, entity_id: &EntityId) -> Result<EventStream<'_>, EventLogError> {
        self.read_from(entity_id, 0)
    }

    /// Sequence number of the newest record of `entity_id`, if any.
    fn tail_seq(&self, entity_id: &EntityId) -> Result<Option<u64>, EventLogError>;
}

impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    fn read_from(
        &self,
        entity_id: &EntityId,
        from_seq: u64,
    ) -> Result<EventStream<'_>, EventLogError> {
        (**self).read_from(entity_id, from_seq)
    }

    fn read_from_snapshot(&self, entity_id: &EntityId) -> Result<EventStream<'_>, EventLogError> {
        (**self).read_from_snapshot(entity_id)
    }

    fn tail_seq(&self, entity_id: &EntityId) -> Result<Option<u64>, EventLogError> {
        (**self).tail_seq(entity_id)
    }
}
