use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::error::Result;
use crate::item::ItemRef;

use super::store::TagIndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Vec<ItemRef>>,
    /// Bumped on every invalidation
    generation: u64,
}

/// Read-through cache over a [`TagIndexStore`].
///
/// Any successful write clears the whole cache; entries are refilled lazily
/// per tag on the next read.
#[derive(Debug)]
pub struct TagIndexCache {
    store: TagIndexStore,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TagIndexCache {
    pub fn new(store: TagIndexStore) -> Self {
        Self {
            store,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &TagIndexStore {
        &self.store
    }

    /// Members of `tag`, served from cache when possible.
    pub fn members(&self, tag: &str) -> Result<Vec<ItemRef>> {
        let generation = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(members) = state.entries.get(tag) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(members.clone());
            }
            state.generation
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!("[tag_index] Cache miss for tag {:?}", tag);
        let members = self.store.read(tag)?;

        // A write that landed while we were reading makes this result stale
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.entries.insert(tag.to_string(), members.clone());
        }
        Ok(members)
    }

    /// Write through to the store, then drop every cached entry.
    ///
    /// A failed write leaves the cache untouched.
    pub fn write(&self, tag: &str, members: &[ItemRef]) -> Result<()> {
        self.store.write(tag, members)?;
        self.invalidate_all();
        Ok(())
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
        state.generation = state.generation.wrapping_add(1);
    }

    /// Tag listing is read from the store directly; it is not cached.
    pub fn list_tags(&self) -> Result<BTreeSet<String>> {
        self.store.list_tags()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .state
            .read()
            .map(|s| s.entries.len())
            .unwrap_or(0);
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
