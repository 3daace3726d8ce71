use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::item::{Item, ItemRef};
use crate::repository::ItemStore;

use super::cache::TagIndexCache;

/// A tag with its member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

/// Read side of the tag index.
pub struct TagQueryService {
    cache: Arc<TagIndexCache>,
}

impl TagQueryService {
    pub fn new(cache: Arc<TagIndexCache>) -> Self {
        Self { cache }
    }

    /// Identifiers recorded under `tag`, in insertion order.
    pub fn item_refs_by_tag(&self, tag: &str) -> Result<Vec<ItemRef>> {
        self.cache.members(tag)
    }

    /// Items recorded under `tag`. Identifiers the store cannot load are skipped.
    pub fn items_by_tag<S>(&self, store: &S, tag: &str) -> Result<Vec<Item>>
    where
        S: ItemStore + ?Sized,
    {
        let refs = self.item_refs_by_tag(tag)?;
        Ok(resolve(store, &refs))
    }

    /// Identifiers present under every tag in `tags`, in the first tag's order.
    ///
    /// An empty tag list matches nothing.
    pub fn item_refs_by_all_tags<T: AsRef<str>>(&self, tags: &[T]) -> Result<Vec<ItemRef>> {
        let Some((first, rest)) = tags.split_first() else {
            return Ok(Vec::new());
        };

        let mut result = self.cache.members(first.as_ref())?;
        for tag in rest {
            if result.is_empty() {
                break;
            }
            let members: HashSet<ItemRef> = self.cache.members(tag.as_ref())?.into_iter().collect();
            result.retain(|r| members.contains(r));
        }
        Ok(result)
    }

    pub fn items_by_all_tags<S, T>(&self, store: &S, tags: &[T]) -> Result<Vec<Item>>
    where
        S: ItemStore + ?Sized,
        T: AsRef<str>,
    {
        let refs = self.item_refs_by_all_tags(tags)?;
        Ok(resolve(store, &refs))
    }

    pub fn all_tags(&self) -> Result<BTreeSet<String>> {
        self.cache.list_tags()
    }

    /// Member count per tag.
    pub fn tag_statistics(&self) -> Result<BTreeMap<String, usize>> {
        let mut stats = BTreeMap::new();
        for tag in self.all_tags()? {
            let count = self.cache.members(&tag)?.len();
            if count > 0 {
                stats.insert(tag, count);
            }
        }
        Ok(stats)
    }

    /// Tags starting with `prefix` (case-sensitive), sorted. An empty prefix returns all tags.
    pub fn search_tags_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .all_tags()?
            .into_iter()
            .filter(|tag| tag.starts_with(prefix))
            .collect())
    }

    /// Statistics as a list sorted by case-insensitive name.
    pub fn tag_summaries(&self) -> Result<Vec<TagCount>> {
        let mut summaries: Vec<TagCount> = self
            .tag_statistics()?
            .into_iter()
            .map(|(name, count)| TagCount { name, count })
            .collect();
        summaries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(summaries)
    }
}

fn resolve<S: ItemStore + ?Sized>(store: &S, refs: &[ItemRef]) -> Vec<Item> {
    refs.iter()
        .filter_map(|r| match store.load_item(r) {
            Ok((item, _content)) => Some(item),
            Err(e) => {
                log::warn!("[tag_index] Skipping unresolvable entry {}: {}", r, e);
                None
            }
        })
        .collect()
}
