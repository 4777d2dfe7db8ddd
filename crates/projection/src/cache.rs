//! Projection cache: `EntityId -> CacheEntry` with pluggable eviction.
//!
//! Eviction only ever costs hit rate: a missing entry is rebuilt from the log.
//! Individual operations are thread-safe, sequences of them are not atomic.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use adhoc_core::EntityId;

/// Cached projection state of one entity.
///
/// `last_applied_seq` is the sequence number of the last record observed while
/// building the entry, whether or not that record changed `state`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<S> {
    entity_id: EntityId,
    last_applied_seq: u64,
    state: S,
    created_at: DateTime<Utc>,
}

impl<S> CacheEntry<S> {
    pub fn new(entity_id: EntityId, last_applied_seq: u64, state: S, created_at: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            last_applied_seq,
            state,
            created_at,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Same state and sequence, new timestamp.
    pub fn refreshed(self, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            ..self
        }
    }

    /// Same state, observed up to `seq`.
    pub fn advanced_to(self, seq: u64, at: DateTime<Utc>) -> Self {
        Self {
            last_applied_seq: seq,
            created_at: at,
            ..self
        }
    }
}

/// Keyed store of cache entries.
///
/// A `put` always replaces the previous entry for the key as a whole.
pub trait ProjectionCache<S>: Send + Sync {
    fn get(&self, entity_id: &EntityId) -> Option<CacheEntry<S>>;

    fn put(&self, entity_id: EntityId, entry: CacheEntry<S>);

    fn contains_key(&self, entity_id: &EntityId) -> bool;

    fn remove_all(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S, C> ProjectionCache<S> for Arc<C>
where
    C: ProjectionCache<S> + ?Sized,
{
    fn get(&self, entity_id: &EntityId) -> Option<CacheEntry<S>> {
        (**self).get(entity_id)
    }

    fn put(&self, entity_id: EntityId, entry: CacheEntry<S>) {
        (**self).put(entity_id, entry)
    }

    fn contains_key(&self, entity_id: &EntityId) -> bool {
        (**self).contains_key(entity_id)
    }

    fn remove_all(&self) {
        (**self).remove_all()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Which cache implementation a repository should create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Keep nothing; every query is a cold build.
    None,
    /// Keep everything until reset.
    Unbounded,
    /// Keep at most `capacity` entries, evicting the least recently read one.
    Lru { capacity: NonZeroUsize },
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Lru {
            capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl CachePolicy {
    pub fn build<S>(self) -> Arc<dyn ProjectionCache<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        match self {
            CachePolicy::None => Arc::new(NoCache),
            CachePolicy::Unbounded => Arc::new(UnboundedCache::new()),
            CachePolicy::Lru { capacity } => Arc::new(LruCache::new(capacity)),
        }
    }
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl<S> ProjectionCache<S> for NoCache {
    fn get(&self, _entity_id: &EntityId) -> Option<CacheEntry<S>> {
        None
    }

    fn put(&self, _entity_id: EntityId, _entry: CacheEntry<S>) {}

    fn contains_key(&self, _entity_id: &EntityId) -> bool {
        false
    }

    fn remove_all(&self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Sharded concurrent map without eviction.
#[derive(Debug)]
pub struct UnboundedCache<S> {
    entries: DashMap<EntityId, CacheEntry<S>>,
}

impl<S> UnboundedCache<S> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<S> Default for UnboundedCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProjectionCache<S> for UnboundedCache<S>
where
    S: Clone + Send + Sync,
{
    fn get(&self, entity_id: &EntityId) -> Option<CacheEntry<S>> {
        self.entries.get(entity_id).map(|e| e.value().clone())
    }

    fn put(&self, entity_id: EntityId, entry: CacheEntry<S>) {
        self.entries.insert(entity_id, entry);
    }

    fn contains_key(&self, entity_id: &EntityId) -> bool {
        self.entries.contains_key(entity_id)
    }

    fn remove_all(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Slot<S> {
    entry: CacheEntry<S>,
    tick: u64,
}

struct LruState<S> {
    slots: HashMap<EntityId, Slot<S>>,
    /// Access tick -> key; the first element is the least recently used.
    order: BTreeMap<u64, EntityId>,
    next_tick: u64,
}

impl<S> LruState<S> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}

/// Size-bounded cache evicting the least recently accessed entry.
///
/// `get` and `put` count as accesses, `contains_key` does not.
pub struct LruCache<S> {
    capacity: NonZeroUsize,
    state: Mutex<LruState<S>>,
}

impl<S> core::fmt::Debug for LruCache<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.state.lock().slots.len())
            .finish()
    }
}

impl<S> LruCache<S> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState {
                slots: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

impl<S> ProjectionCache<S> for LruCache<S>
where
    S: Clone + Send + Sync,
{
    fn get(&self, entity_id: &EntityId) -> Option<CacheEntry<S>> {
        let mut state = self.state.lock();
        let tick = state.bump();
        let slot = state.slots.get_mut(entity_id)?;
        let previous = std::mem::replace(&mut slot.tick, tick);
        let entry = slot.entry.clone();
        state.order.remove(&previous);
        state.order.insert(tick, entity_id.clone());
        Some(entry)
    }

    fn put(&self, entity_id: EntityId, entry: CacheEntry<S>) {
        let mut state = self.state.lock();
        let tick = state.bump();
        if let Some(old) = state.slots.insert(entity_id.clone(), Slot { entry, tick }) {
            state.order.remove(&old.tick);
        }
        state.order.insert(tick, entity_id);

        while state.slots.len() > self.capacity.get() {
            let Some((_, evicted)) = state.order.pop_first() else {
                break;
            };
            state.slots.remove(&evicted);
            tracing::trace!(entity_id = %evicted, "evicted least recently used projection");
        }
    }

    fn contains_key(&self, entity_id: &EntityId) -> bool {
        self.state.lock().slots.contains_key(entity_id)
    }

    fn remove_all(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.order.clear();
    }

    fn len(&self) -> usize {
        self.state.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(id: &str, seq: u64, state: i64) -> CacheEntry<i64> {
        CacheEntry::new(EntityId::new(id), seq, state, Utc::now())
    }

    fn lru(capacity: usize) -> LruCache<i64> {
        LruCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn put_replaces_the_whole_entry() {
        let cache = UnboundedCache::new();
        let id = EntityId::new("a");
        cache.put(id.clone(), entry("a", 1, 10));
        cache.put(id.clone(), entry("a", 4, 40));

        let got = cache.get(&id).unwrap();
        assert_eq!((got.last_applied_seq(), *got.state()), (4, 40));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_cache_never_holds_entries() {
        let cache = NoCache;
        let id = EntityId::new("a");
        ProjectionCache::<i64>::put(&cache, id.clone(), entry("a", 0, 1));
        assert!(ProjectionCache::<i64>::get(&cache, &id).is_none());
        assert!(!ProjectionCache::<i64>::contains_key(&cache, &id));
    }

    #[test]
    fn lru_evicts_least_recently_read_entry() {
        let cache = lru(2);
        cache.put(EntityId::new("a"), entry("a", 0, 1));
        cache.put(EntityId::new("b"), entry("b", 0, 2));

        // Reading "a" makes "b" the eviction candidate.
        assert!(cache.get(&EntityId::new("a")).is_some());
        cache.put(EntityId::new("c"), entry("c", 0, 3));

        assert!(cache.contains_key(&EntityId::new("a")));
        assert!(!cache.contains_key(&EntityId::new("b")));
        assert!(cache.contains_key(&EntityId::new("c")));
    }

    #[test]
    fn contains_key_does_not_refresh_recency() {
        let cache = lru(2);
        cache.put(EntityId::new("a"), entry("a", 0, 1));
        cache.put(EntityId::new("b"), entry("b", 0, 2));

        assert!(cache.contains_key(&EntityId::new("a")));
        cache.put(EntityId::new("c"), entry("c", 0, 3));

        assert!(!cache.contains_key(&EntityId::new("a")));
    }

    #[test]
    fn remove_all_clears_every_implementation() {
        let caches: Vec<Arc<dyn ProjectionCache<i64>>> = vec![
            CachePolicy::Unbounded.build(),
            CachePolicy::default().build(),
        ];
        for cache in caches {
            cache.put(EntityId::new("a"), entry("a", 0, 1));
            assert!(!cache.is_empty());
            cache.remove_all();
            assert!(cache.is_empty());
            assert!(cache.get(&EntityId::new("a")).is_none());
        }
    }

    #[test]
    fn cache_policy_deserializes_from_tagged_config() {
        let policy: CachePolicy =
            serde_json::from_str(r#"{ "kind": "lru", "capacity": 8 }"#).unwrap();
        assert_eq!(
            policy,
            CachePolicy::Lru {
                capacity: NonZeroUsize::new(8).unwrap()
            }
        );
        assert!(serde_json::from_str::<CachePolicy>(r#"{ "kind": "lru", "capacity": 0 }"#).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the LRU never exceeds its capacity and always keeps the newest write.
        #[test]
        fn lru_respects_capacity(
            capacity in 1usize..8,
            ops in prop::collection::vec((0u8..16, any::<bool>()), 1..64)
        ) {
            let cache = lru(capacity);
            for (key, is_read) in ops {
                let id = EntityId::new(format!("e{key}"));
                if is_read {
                    let _ = cache.get(&id);
                } else {
                    cache.put(id.clone(), entry(id.as_str(), key as u64, key as i64));
                    prop_assert!(cache.contains_key(&id));
                }
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
