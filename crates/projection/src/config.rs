//! Per-repository configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;

/// Repository behavior knobs.
///
/// Deserializable so it can live in whatever configuration source the host
/// process uses; missing fields fall back to [`RepositoryConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Cache implementation. Default: LRU with 1024 entries.
    pub cache: CachePolicy,
    /// How long (ms) a cache entry is trusted without asking the log for newer
    /// events. `0` revalidates on every query.
    pub refresh_window_ms: u64,
    /// Always read streams from sequence 0 instead of the log's snapshot point.
    pub ignore_snapshots: bool,
    /// Live feed only: build and cache the projection for events of uncached
    /// entities instead of ignoring them.
    pub force_insert: bool,
    /// Live feed only: move an entry's sequence forward on the exact-next event
    /// even when the projection has no update operation for it.
    pub advance_on_irrelevant: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache: CachePolicy::default(),
            refresh_window_ms: 0,
            ignore_snapshots: false,
            force_insert: false,
            advance_on_irrelevant: false,
        }
    }
}

impl RepositoryConfig {
    pub fn with_cache(self, cache: CachePolicy) -> Self {
        Self { cache, ..self }
    }

    pub fn with_lru_capacity(self, capacity: NonZeroUsize) -> Self {
        self.with_cache(CachePolicy::Lru { capacity })
    }

    pub fn with_refresh_window(self, window: Duration) -> Self {
        Self {
            refresh_window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            ..self
        }
    }

    pub fn with_ignore_snapshots(self, ignore_snapshots: bool) -> Self {
        Self {
            ignore_snapshots,
            ..self
        }
    }

    pub fn with_force_insert(self, force_insert: bool) -> Self {
        Self {
            force_insert,
            ..self
        }
    }

    pub fn with_advance_on_irrelevant(self, advance_on_irrelevant: bool) -> Self {
        Self {
            advance_on_irrelevant,
            ..self
        }
    }

    /// Staleness window as a chrono delta (saturating).
    pub fn refresh_window(&self) -> TimeDelta {
        i64::try_from(self.refresh_window_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn always_revalidate(&self) -> bool {
        self.refresh_window_ms == 0
    }
}
