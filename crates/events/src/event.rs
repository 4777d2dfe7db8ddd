use serde::{Serialize, de::DeserializeOwned};

/// A typed domain event payload.
///
/// Events are immutable facts. Each payload type carries a stable tag that is
/// stored next to the serialized payload; projections dispatch on that tag, never
/// on the shape of the JSON.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static
{
    /// Stable payload type identifier (e.g. "bank.account.created").
    const EVENT_TYPE: &'static str;
}
