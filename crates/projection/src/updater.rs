//! Live-feed maintenance of cached projections.
//!
//! An [`IncrementalUpdater`] wraps a [`Repository`] and applies single records
//! from the live feed to cached entries:
//!
//! | cached `L` vs. incoming `S` | action |
//! |---|---|
//! | no entry, `force_insert` | cold build bounded at `S`, insert, notify |
//! | no entry | ignore (built lazily on the next query) |
//! | `L + 1 == S` | apply the one record, notify |
//! | `L + 1 < S` | gap: catch up to the log tail, notify |
//! | `L >= S` | duplicate or replay: ignore |
//!
//! Per-entity ordering is the feed's responsibility; the updater only compares
//! sequence numbers.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use adhoc_core::EntityId;
use adhoc_events::{EventLog, EventRecord};

use crate::cache::CacheEntry;
use crate::error::RepositoryError;
use crate::repository::Repository;

/// Callback fired with the new state whenever the updater creates or changes an entry.
pub trait ModelListener<S>: Send + Sync {
    fn model_updated(&self, model: &S);
}

impl<S, F> ModelListener<S> for F
where
    F: Fn(&S) + Send + Sync,
{
    fn model_updated(&self, model: &S) {
        self(model)
    }
}

/// Repository that also follows the live feed.
pub struct IncrementalUpdater<S, L> {
    repository: Repository<S, L>,
    listeners: RwLock<Vec<Arc<dyn ModelListener<S>>>>,
}

impl<S, L> core::fmt::Debug for IncrementalUpdater<S, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IncrementalUpdater")
            .field("repository", &self.repository)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl<S, L> IncrementalUpdater<S, L>
where
    S: Clone + Send + Sync + 'static,
    L: EventLog,
{
    pub fn new(repository: Repository<S, L>) -> Self {
        Self {
            repository,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn repository(&self) -> &Repository<S, L> {
        &self.repository
    }

    pub fn name(&self) -> &str {
        self.repository.name()
    }

    /// Query path, see [`Repository::find_by_id`].
    pub fn find_by_id(&self, entity_id: &EntityId) -> Result<Option<S>, RepositoryError> {
        self.repository.find_by_id(entity_id)
    }

    pub fn reset_cache(&self) {
        self.repository.reset_cache();
    }

    /// Register `listener`; returns `false` if that exact listener is already registered.
    pub fn add_listener(&self, listener: Arc<dyn ModelListener<S>>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister `listener`; returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ModelListener<S>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// True iff the projection has an update operation for the record's payload type.
    pub fn can_handle(&self, record: &EventRecord) -> bool {
        self.repository.registry().is_relevant(record.payload_type())
    }

    /// Apply one live record.
    pub fn on(&self, record: &EventRecord) -> Result<(), RepositoryError> {
        let entity_id = record.entity_id();
        let seq = record.sequence_number();
        trace!(
            projection = self.name(),
            entity_id = %entity_id,
            seq,
            payload_type = record.payload_type(),
            "live event received"
        );

        match self.repository.cached_entry(entity_id) {
            Some(entry) => self.on_cached(record, entry),
            None if self.repository.config().force_insert => {
                debug!(
                    projection = self.name(),
                    entity_id = %entity_id,
                    seq,
                    "entity not cached, rebuilding up to live event"
                );
                if let Some(state) = self.repository.rebuild_up_to(entity_id, seq)? {
                    self.notify(&state);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn on_cached(&self, record: &EventRecord, entry: CacheEntry<S>) -> Result<(), RepositoryError> {
        let entity_id = record.entity_id();
        let seq = record.sequence_number();
        let cached = entry.last_applied_seq();

        if cached >= seq {
            debug!(
                projection = self.name(),
                entity_id = %entity_id,
                cached,
                seq,
                "cached projection is already past this event, replay in progress"
            );
            return Ok(());
        }

        if cached + 1 < seq {
            debug!(
                projection = self.name(),
                entity_id = %entity_id,
                cached,
                seq,
                "missed events, catching up from the log"
            );
            let state = self.repository.catch_up(entry)?;
            self.notify(&state);
            return Ok(());
        }

        let cache = self.repository.cache();
        let now = self.repository.now();
        match self.repository.registry().find_updater(record.payload_type()) {
            Some(updater) => {
                debug!(
                    projection = self.name(),
                    entity_id = %entity_id,
                    seq,
                    "applying live event to cached projection"
                );
                let state = updater.apply(entry.into_state(), record)?;
                cache.put(
                    entity_id.clone(),
                    CacheEntry::new(entity_id.clone(), seq, state.clone(), now),
                );
                self.notify(&state);
            }
            None if self.repository.config().advance_on_irrelevant => {
                cache.put(entity_id.clone(), entry.advanced_to(seq, now));
            }
            None => {
                trace!(
                    projection = self.name(),
                    entity_id = %entity_id,
                    seq,
                    "event not relevant, cached sequence left unchanged"
                );
            }
        }
        Ok(())
    }

    fn notify(&self, state: &S) {
        // Snapshot so listeners may (un)register listeners themselves.
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            listener.model_updated(state);
        }
    }
}
