use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::item::{Item, ItemRef};

use super::cache::TagIndexCache;

/// Tags to drop from and add to an item's index entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagDiff {
    pub removed: BTreeSet<String>,
    pub added: BTreeSet<String>,
}

impl TagDiff {
    pub fn between(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            removed: previous.difference(current).cloned().collect(),
            added: current.difference(previous).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn len(&self) -> usize {
        self.removed.len() + self.added.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub items: usize,
    pub tags: usize,
    pub removed_tags: usize,
}

/// Applies tag-set changes to the tag index.
///
/// Each tag is an independent file update. Updates made through one
/// reconciler are serialized so concurrent reconciles in this process do not
/// lose each other's membership changes.
pub struct Reconciler {
    cache: Arc<TagIndexCache>,
    write_gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(cache: Arc<TagIndexCache>) -> Self {
        Self {
            cache,
            write_gate: Mutex::new(()),
        }
    }

    /// Move `item` from the `previous` tag set to the `current` one.
    ///
    /// Removals run before additions and every update is attempted. If any
    /// fail, the updates that succeeded stay applied and the first failure is
    /// returned inside [`Error::PartialReconcile`].
    pub fn reconcile(
        &self,
        item: &ItemRef,
        previous: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> Result<TagDiff> {
        let diff = TagDiff::between(previous, current);
        if diff.is_empty() {
            return Ok(diff);
        }

        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut errors = Vec::new();

        for tag in &diff.removed {
            if let Err(e) = self.remove_member(tag, item) {
                log::warn!("[reconcile] Failed to remove {} from tag {:?}: {}", item, tag, e);
                errors.push(e);
            }
        }
        for tag in &diff.added {
            if let Err(e) = self.add_member(tag, item) {
                log::warn!("[reconcile] Failed to add {} to tag {:?}: {}", item, tag, e);
                errors.push(e);
            }
        }

        if errors.is_empty() {
            log::debug!(
                "[reconcile] {}: -{} +{} tags",
                item,
                diff.removed.len(),
                diff.added.len()
            );
            return Ok(diff);
        }

        let failed = errors.len();
        Err(Error::PartialReconcile {
            item: item.clone(),
            attempted: diff.len(),
            failed,
            first: Box::new(errors.swap_remove(0)),
        })
    }

    /// Drop `item` from every tag in `previous`, e.g. after the item was deleted.
    pub fn remove_item(&self, item: &ItemRef, previous: &BTreeSet<String>) -> Result<TagDiff> {
        self.reconcile(item, previous, &BTreeSet::new())
    }

    fn remove_member(&self, tag: &str, item: &ItemRef) -> Result<()> {
        let mut members = self.cache.members(tag)?;
        let before = members.len();
        members.retain(|m| m != item);
        if members.len() == before {
            return Ok(());
        }
        self.cache.write(tag, &members)
    }

    fn add_member(&self, tag: &str, item: &ItemRef) -> Result<()> {
        let mut members = self.cache.members(tag)?;
        if members.contains(item) {
            return Ok(());
        }
        members.push(item.clone());
        self.cache.write(tag, &members)
    }

    /// Recompute the whole index from the items' own tag sets.
    ///
    /// Tag files for tags no item carries any more are deleted. Items whose
    /// identifier is invalid are skipped.
    pub fn rebuild<I>(&self, items: I) -> Result<RebuildReport>
    where
        I: IntoIterator<Item = Item>,
    {
        let mut memberships: BTreeMap<String, Vec<ItemRef>> = BTreeMap::new();
        let mut item_count = 0;

        for item in items {
            let item_ref = match item.item_ref() {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("[reconcile] Skipping item during rebuild: {}", e);
                    continue;
                }
            };
            item_count += 1;
            for tag in &item.tags {
                memberships
                    .entry(tag.clone())
                    .or_default()
                    .push(item_ref.clone());
            }
        }

        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let store = self.cache.store();
        let existing = store.list_tags()?;

        let mut result = Ok(());
        for (tag, members) in &memberships {
            if let Err(e) = store.write(tag, members) {
                log::warn!("[reconcile] Rebuild could not write tag {:?}: {}", tag, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        let mut removed_tags = 0;
        for tag in existing.iter().filter(|t| !memberships.contains_key(*t)) {
            match store.write(tag, &[]) {
                Ok(()) => removed_tags += 1,
                Err(e) => {
                    log::warn!("[reconcile] Rebuild could not remove tag {:?}: {}", tag, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        self.cache.invalidate_all();
        result?;

        let report = RebuildReport {
            items: item_count,
            tags: memberships.len(),
            removed_tags,
        };
        log::info!(
            "[reconcile] Rebuilt tag index: {} items, {} tags, {} stale tags removed",
            report.items,
            report.tags,
            report.removed_tags
        );
        Ok(report)
    }
}
