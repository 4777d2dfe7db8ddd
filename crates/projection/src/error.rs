//! Error taxonomy of the projection engine.
//!
//! - [`RegistryError`]: build-time configuration bugs, the projection type is unusable
//! - [`RepositoryError`]: query/apply-time failures for one entity
//! - [`DispatchError`]: aggregate of per-updater failures on the live feed

use thiserror::Error;

use adhoc_core::EntityId;
use adhoc_events::EventLogError;

/// Which operation table a registration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Construction,
    Update,
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OperationKind::Construction => f.write_str("construction"),
            OperationKind::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(
        "projection `{projection}` registers more than one {kind} operation for payload type `{payload_type}`"
    )]
    DuplicateHandler {
        projection: String,
        kind: OperationKind,
        payload_type: String,
    },

    #[error(
        "update operation of `{projection}` for `{payload_type}` returns `{returned}`; only `{expected}` or an in-place update is allowed"
    )]
    IllegalReturnType {
        projection: String,
        payload_type: String,
        returned: &'static str,
        expected: &'static str,
    },

    #[error("projection `{projection}` has no construction or update operations")]
    NoHandlersFound { projection: String },
}

/// A payload could not be decoded into the event type registered for its tag.
#[derive(Debug, Error)]
#[error("failed to decode payload of type `{payload_type}`: {source}")]
pub struct PayloadDecodeError {
    pub payload_type: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no events found for entity {entity_id}")]
    AggregateNotFound { entity_id: EntityId },

    #[error(
        "projection `{projection}` has no construction operation for `{payload_type}` (entity {entity_id}) and no default constructor"
    )]
    NoSuitableConstructor {
        projection: String,
        entity_id: EntityId,
        payload_type: String,
    },

    /// The log reports a tail behind (or without) what the cache already applied.
    #[error("event log tail of {entity_id} is {tail:?} but the cache already applied sequence {cached}")]
    LogInconsistency {
        entity_id: EntityId,
        cached: u64,
        tail: Option<u64>,
    },

    #[error(transparent)]
    PayloadDecode(#[from] PayloadDecodeError),

    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// At least one interested updater failed; the others still received the event.
    #[error(
        "failed to apply event {entity_id}/{sequence_number} to the following updaters: {failed:?}"
    )]
    ProcessingFailure {
        entity_id: EntityId,
        sequence_number: u64,
        failed: Vec<String>,
    },
}

impl DispatchError {
    /// Names of the updaters that failed.
    pub fn failed(&self) -> &[String] {
        match self {
            DispatchError::ProcessingFailure { failed, .. } => failed,
        }
    }
}
