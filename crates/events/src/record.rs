use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use adhoc_core::EntityId;

use crate::DomainEvent;

/// One sequenced entry of an entity's event stream.
///
/// Notes:
/// - `sequence_number` is per entity, starts at 0 and grows by exactly 1.
/// - `payload_type` is the [`DomainEvent::EVENT_TYPE`] the payload was written with.
/// - The payload stays JSON until a projection that cares about it decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    event_id: Uuid,
    entity_id: EntityId,
    sequence_number: u64,
    payload_type: String,
    payload: JsonValue,
    timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        entity_id: EntityId,
        sequence_number: u64,
        payload_type: impl Into<String>,
        payload: JsonValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            entity_id,
            sequence_number,
            payload_type: payload_type.into(),
            payload,
            timestamp,
        }
    }

    /// Serialize a typed event into a record.
    pub fn from_typed<E: DomainEvent>(
        entity_id: EntityId,
        sequence_number: u64,
        event: &E,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            entity_id,
            sequence_number,
            E::EVENT_TYPE,
            payload,
            timestamp,
        ))
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Metadata handed to construction/update operations next to the payload.
    pub fn meta(&self) -> EventMeta<'_> {
        EventMeta {
            entity_id: &self.entity_id,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
        }
    }

    /// Decode the payload as `E`.
    ///
    /// The tag is not checked here; callers dispatch on the tag first.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, serde_json::Error> {
        E::deserialize(&self.payload)
    }
}

/// Record metadata visible to projection operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta<'a> {
    pub entity_id: &'a EntityId,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// A message on the live feed.
///
/// Only entity-scoped records take part in projection maintenance; broadcast
/// messages (system notices, unsequenced integration events) share the
/// transport but are ignored by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedMessage {
    Entity(EventRecord),
    Broadcast {
        payload_type: String,
        payload: JsonValue,
        timestamp: DateTime<Utc>,
    },
}

impl FeedMessage {
    /// The sequenced record, if this message is entity scoped.
    pub fn record(&self) -> Option<&EventRecord> {
        match self {
            FeedMessage::Entity(record) => Some(record),
            FeedMessage::Broadcast { .. } => None,
        }
    }

    /// Partitioning key: the entity id for entity-scoped messages.
    pub fn partition_key(&self) -> Option<&EntityId> {
        self.record().map(EventRecord::entity_id)
    }

    pub fn payload_type(&self) -> &str {
        match self {
            FeedMessage::Entity(record) => record.payload_type(),
            FeedMessage::Broadcast { payload_type, .. } => payload_type,
        }
    }
}

impl From<EventRecord> for FeedMessage {
    fn from(value: EventRecord) -> Self {
        FeedMessage::Entity(value)
    }
}
