//! Hashtag extraction and the persistent tag → items index.

pub mod cache;
pub mod extract;
pub mod query;
pub mod reconcile;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::RepositoryPaths;
use crate::error::Result;
use crate::item::{Item, ItemRef};
use crate::repository::ItemStore;

pub use cache::{CacheStats, TagIndexCache};
pub use extract::{extract_tags, is_canonical_tag};
pub use query::{TagCount, TagQueryService};
pub use reconcile::{RebuildReport, Reconciler, TagDiff};
pub use store::TagIndexStore;

/// Entry point for the item store and request handlers: the reconciler and
/// the query service, sharing one cache.
pub struct TagService {
    cache: Arc<TagIndexCache>,
    reconciler: Reconciler,
    query: TagQueryService,
}

impl TagService {
    pub fn new(paths: &RepositoryPaths) -> Self {
        Self::with_cache(Arc::new(TagIndexCache::new(TagIndexStore::new(paths))))
    }

    pub fn with_cache(cache: Arc<TagIndexCache>) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&cache)),
            query: TagQueryService::new(Arc::clone(&cache)),
            cache,
        }
    }

    pub fn cache(&self) -> &TagIndexCache {
        &self.cache
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn query(&self) -> &TagQueryService {
        &self.query
    }

    pub fn extract_tags(&self, text: &str) -> BTreeSet<String> {
        extract_tags(text)
    }

    pub fn reconcile(
        &self,
        item: &ItemRef,
        previous: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> Result<TagDiff> {
        self.reconciler.reconcile(item, previous, current)
    }

    pub fn items_by_tag<S: ItemStore + ?Sized>(&self, store: &S, tag: &str) -> Result<Vec<Item>> {
        self.query.items_by_tag(store, tag)
    }

    pub fn items_by_all_tags<S, T>(&self, store: &S, tags: &[T]) -> Result<Vec<Item>>
    where
        S: ItemStore + ?Sized,
        T: AsRef<str>,
    {
        self.query.items_by_all_tags(store, tags)
    }

    pub fn all_tags(&self) -> Result<BTreeSet<String>> {
        self.query.all_tags()
    }

    pub fn tag_statistics(&self) -> Result<BTreeMap<String, usize>> {
        self.query.tag_statistics()
    }

    pub fn search_tags_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.query.search_tags_by_prefix(prefix)
    }
}
