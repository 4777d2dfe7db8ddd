//! Cache-backed projection repository.
//!
//! `find_by_id` answers from the cache when the entry is inside the staleness
//! window, catches an entry up from `last_applied_seq + 1` when the log has
//! moved on, and falls back to a cold build from the origin (or snapshot point)
//! when nothing is cached.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use adhoc_core::{Clock, EntityId, SystemClock};
use adhoc_events::{EventLog, EventRecord, EventStream};

use crate::cache::{CacheEntry, ProjectionCache};
use crate::config::RepositoryConfig;
use crate::error::RepositoryError;
use crate::registry::DispatchRegistry;

/// Builds, caches and refreshes projections of type `S` from the event log `L`.
pub struct Repository<S, L> {
    registry: Arc<DispatchRegistry<S>>,
    log: L,
    cache: Arc<dyn ProjectionCache<S>>,
    config: RepositoryConfig,
    clock: Arc<dyn Clock>,
}

impl<S, L> core::fmt::Debug for Repository<S, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Repository")
            .field("projection", &self.registry.name())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl<S, L> Repository<S, L>
where
    S: Clone + Send + Sync + 'static,
    L: EventLog,
{
    /// Repository with the cache described by `config.cache` and the system clock.
    pub fn new(registry: impl Into<Arc<DispatchRegistry<S>>>, log: L, config: RepositoryConfig) -> Self {
        let cache = config.cache.build::<S>();
        Self {
            registry: registry.into(),
            log,
            cache,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the configured cache with a caller-provided one (e.g. shared).
    pub fn with_cache(self, cache: Arc<dyn ProjectionCache<S>>) -> Self {
        Self { cache, ..self }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    pub fn name(&self) -> &str {
        self.registry.name()
    }

    pub fn registry(&self) -> &DispatchRegistry<S> {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &dyn ProjectionCache<S> {
        self.cache.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current cache entry of `entity_id`, without touching the log.
    pub fn cached_entry(&self, entity_id: &EntityId) -> Option<CacheEntry<S>> {
        self.cache.get(entity_id)
    }

    /// Projection of `entity_id`, or `None` if its stream is empty.
    pub fn find_by_id(&self, entity_id: &EntityId) -> Result<Option<S>, RepositoryError> {
        let Some(entry) = self.cache.get(entity_id) else {
            return not_found_as_none(self.read_from_scratch(entity_id, None));
        };

        let now = self.clock.now();
        let window_elapsed = self.config.always_revalidate()
            || now - entry.created_at() >= self.config.refresh_window();

        if !window_elapsed {
            trace!(
                projection = self.name(),
                entity_id = %entity_id,
                seq = entry.last_applied_seq(),
                "serving projection from cache inside refresh window"
            );
            return Ok(Some(entry.into_state()));
        }

        self.catch_up(entry).map(Some)
    }

    /// Build from the origin up to and including `upper_seq` and cache the result.
    ///
    /// Used when the caller knows which event it has seen and must not race ahead
    /// to the live tail.
    pub fn rebuild_up_to(
        &self,
        entity_id: &EntityId,
        upper_seq: u64,
    ) -> Result<Option<S>, RepositoryError> {
        not_found_as_none(self.read_from_scratch(entity_id, Some(upper_seq)))
    }

    /// Drop every cached entry of this repository.
    pub fn reset_cache(&self) {
        debug!(projection = self.name(), "resetting projection cache");
        self.cache.remove_all();
    }

    /// Bring `entry` up to the log's current tail and cache the result.
    pub(crate) fn catch_up(&self, entry: CacheEntry<S>) -> Result<S, RepositoryError> {
        let entity_id = entry.entity_id().clone();
        let cached = entry.last_applied_seq();
        debug!(
            projection = self.name(),
            entity_id = %entity_id,
            seq = cached,
            "revalidating cached projection"
        );

        let tail = self.log.tail_seq(&entity_id)?;
        match tail {
            Some(tail) if tail == cached => {
                if !self.config.always_revalidate() {
                    let refreshed = entry.refreshed(self.clock.now());
                    self.cache.put(entity_id, refreshed.clone());
                    return Ok(refreshed.into_state());
                }
                Ok(entry.into_state())
            }
            Some(tail) if tail > cached => {
                let records = bounded(self.log.read_from(&entity_id, cached + 1)?, Some(tail));
                let (state, _) = self.fold(&entity_id, entry.into_state(), cached, records)?;

                let updated = CacheEntry::new(entity_id.clone(), tail, state, self.clock.now());
                self.cache.put(entity_id, updated.clone());
                Ok(updated.into_state())
            }
            tail => {
                warn!(
                    projection = self.name(),
                    entity_id = %entity_id,
                    cached,
                    tail = ?tail,
                    "event log tail is behind the cached projection"
                );
                Err(RepositoryError::LogInconsistency {
                    entity_id,
                    cached,
                    tail,
                })
            }
        }
    }

    fn read_from_scratch(
        &self,
        entity_id: &EntityId,
        upper_seq: Option<u64>,
    ) -> Result<S, RepositoryError> {
        debug!(
            projection = self.name(),
            entity_id = %entity_id,
            upper_seq = ?upper_seq,
            "building projection from scratch"
        );

        let stream = if self.config.ignore_snapshots {
            self.log.read_from(entity_id, 0)?
        } else {
            self.log.read_from_snapshot(entity_id)?
        };

        let entry = self.build_entry(entity_id, bounded(stream, upper_seq))?;
        let state = entry.state().clone();
        self.cache.put(entity_id.clone(), entry);
        Ok(state)
    }

    /// Construct from the first record (or the default constructor) and fold the rest.
    fn build_entry(
        &self,
        entity_id: &EntityId,
        stream: EventStream<'_>,
    ) -> Result<CacheEntry<S>, RepositoryError> {
        let mut records = stream.peekable();
        let Some(first) = records.peek() else {
            return Err(RepositoryError::AggregateNotFound {
                entity_id: entity_id.clone(),
            });
        };
        let first_seq = first.sequence_number();

        let state = match self.registry.find_constructor(first.payload_type()) {
            Some(constructor) => {
                let state = constructor.construct(first)?;
                records.next();
                state
            }
            None => match self.registry.construct_default() {
                Some(state) => state,
                None => {
                    return Err(RepositoryError::NoSuitableConstructor {
                        projection: self.name().to_owned(),
                        entity_id: entity_id.clone(),
                        payload_type: first.payload_type().to_owned(),
                    });
                }
            },
        };

        let (state, last_seq) = self.fold(entity_id, state, first_seq, records)?;
        Ok(CacheEntry::new(
            entity_id.clone(),
            last_seq,
            state,
            self.clock.now(),
        ))
    }

    /// Apply `records` in order; returns the state and the highest sequence seen.
    fn fold(
        &self,
        entity_id: &EntityId,
        mut state: S,
        mut last_seq: u64,
        records: impl Iterator<Item = EventRecord>,
    ) -> Result<(S, u64), RepositoryError> {
        for record in records {
            trace!(
                projection = self.name(),
                entity_id = %entity_id,
                seq = record.sequence_number(),
                payload_type = record.payload_type(),
                "folding event"
            );
            last_seq = last_seq.max(record.sequence_number());
            state = self.registry.apply(state, &record)?;
        }
        Ok((state, last_seq))
    }
}

fn bounded(stream: EventStream<'_>, upper_seq: Option<u64>) -> EventStream<'_> {
    match upper_seq {
        Some(upper) => Box::new(stream.take_while(move |r| r.sequence_number() <= upper)),
        None => stream,
    }
}

fn not_found_as_none<S>(result: Result<S, RepositoryError>) -> Result<Option<S>, RepositoryError> {
    match result {
        Ok(state) => Ok(Some(state)),
        Err(RepositoryError::AggregateNotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}
