//! Process-local, time-expiring cache for upstream search results.
//!
//! Keys are normalized query strings; each entry expires independently a
//! fixed TTL after insertion. The cache is owned explicitly (constructed at
//! process start, injected where needed) so tests can swap or flush it, and
//! it is deliberately not shared across instances: losing it on restart is
//! acceptable.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::NewRecipe;

/// Default entry lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default interval for the periodic eviction sweep: ten minutes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    results: Vec<NewRecipe>,
    inserted_at: Instant,
}

pub struct SearchCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

/// Case-fold and trim a raw query into a cache key. Returns `None` for
/// blank queries, which are invalid before they ever reach the cache.
#[must_use]
pub fn normalize_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

impl SearchCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a normalized key. Expired entries are treated as absent and
    /// dropped on the spot.
    pub fn get(&self, key: &str) -> Option<Vec<NewRecipe>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.results.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: String, results: Vec<NewRecipe>) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            key,
            Entry {
                results,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry; returns how many were evicted. Driven by a
    /// periodic background task in the server.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn flush_all(&self) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
