use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use adhoc_core::EntityId;

use crate::log::{EventLog, EventLogError, EventStream};
use crate::{DomainEvent, EventRecord};

#[derive(Debug, Default)]
struct Stream {
    records: Vec<EventRecord>,
    /// First sequence number returned by `read_from_snapshot`.
    snapshot_from: u64,
}

/// In-memory append-only event log.
///
/// Intended for tests/dev. Reads clone the requested slice, so a stream handed
/// out never observes later appends.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: RwLock<HashMap<EntityId, Stream>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a typed event at the next sequence number, stamped with `Utc::now()`.
    pub fn append_typed<E: DomainEvent>(
        &self,
        entity_id: &EntityId,
        event: &E,
    ) -> Result<EventRecord, EventLogError> {
        self.append_typed_at(entity_id, event, Utc::now())
    }

    /// Append a typed event at the next sequence number with an explicit timestamp.
    pub fn append_typed_at<E: DomainEvent>(
        &self,
        entity_id: &EntityId,
        event: &E,
        timestamp: DateTime<Utc>,
    ) -> Result<EventRecord, EventLogError> {
        let mut streams = self.streams.write().map_err(|_| EventLogError::Poisoned)?;
        let stream = streams.entry(entity_id.clone()).or_default();

        let next = stream.records.len() as u64;
        let record = EventRecord::from_typed(entity_id.clone(), next, event, timestamp)?;
        stream.records.push(record.clone());
        Ok(record)
    }

    /// Append a pre-built record. Its sequence number must be exactly the next one.
    pub fn append(&self, record: EventRecord) -> Result<(), EventLogError> {
        let mut streams = self.streams.write().map_err(|_| EventLogError::Poisoned)?;
        let stream = streams.entry(record.entity_id().clone()).or_default();

        let expected = stream.records.len() as u64;
        if record.sequence_number() != expected {
            return Err(EventLogError::InvalidAppend(format!(
                "entity {} expects sequence {expected}, got {}",
                record.entity_id(),
                record.sequence_number()
            )));
        }
        stream.records.push(record);
        Ok(())
    }

    /// Make `read_from_snapshot` start at `seq` for this entity.
    pub fn mark_snapshot(&self, entity_id: &EntityId, seq: u64) -> Result<(), EventLogError> {
        let mut streams = self.streams.write().map_err(|_| EventLogError::Poisoned)?;
        let stream = streams.get_mut(entity_id).ok_or_else(|| {
            EventLogError::InvalidAppend(format!("unknown entity {entity_id}"))
        })?;
        if seq >= stream.records.len() as u64 {
            return Err(EventLogError::InvalidAppend(format!(
                "snapshot point {seq} is beyond the tail of {entity_id}"
            )));
        }
        stream.snapshot_from = seq;
        Ok(())
    }

    fn slice_from(&self, entity_id: &EntityId, from_seq: u64) -> Result<Vec<EventRecord>, EventLogError> {
        let streams = self.streams.read().map_err(|_| EventLogError::Poisoned)?;
        Ok(streams
            .get(entity_id)
            .map(|s| {
                s.records
                    .iter()
                    .skip(usize::try_from(from_seq).unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl EventLog for InMemoryEventLog {
    fn read_from(
        &self,
        entity_id: &EntityId,
        from_seq: u64,
    ) -> Result<EventStream<'_>, EventLogError> {
        let records = self.slice_from(entity_id, from_seq)?;
        Ok(Box::new(records.into_iter()))
    }

    fn read_from_snapshot(&self, entity_id: &EntityId) -> Result<EventStream<'_>, EventLogError> {
        let from = {
            let streams = self.streams.read().map_err(|_| EventLogError::Poisoned)?;
            streams.get(entity_id).map(|s| s.snapshot_from).unwrap_or(0)
        };
        self.read_from(entity_id, from)
    }

    fn tail_seq(&self, entity_id: &EntityId) -> Result<Option<u64>, EventLogError> {
        let streams = self.streams.read().map_err(|_| EventLogError::Poisoned)?;
        Ok(streams
            .get(entity_id)
            .and_then(|s| s.records.last())
            .map(EventRecord::sequence_number))
    }
}
