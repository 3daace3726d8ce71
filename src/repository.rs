//! Filesystem item store.
//!
//! Items live as paired files: metadata at `.meta/<type>s/<id>.json` and
//! content at `<type>s/<id>.md`. Every write keeps the tag index in step.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::{atomic_write_file, RepositoryConfig, RepositoryPaths};
use crate::error::{Error, Result};
use crate::item::{derive_title, Item, ItemRef, ItemType};
use crate::repo_lock::{acquire_repository_lock, LockAcquireResult, RepositoryLock};
use crate::tags::{RebuildReport, TagDiff, TagService};

/// Load/save access to items, as needed by the tag query side.
pub trait ItemStore: Send + Sync {
    /// Item metadata and its content (empty when the item has no content file).
    fn load_item(&self, item: &ItemRef) -> Result<(Item, String)>;

    /// Persist metadata, and content when given. Does not touch the tag index.
    fn save_item(&self, item: &Item, content: Option<&str>) -> Result<()>;
}

pub struct Repository {
    paths: RepositoryPaths,
    config: RepositoryConfig,
    tags: TagService,
}

impl Repository {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = RepositoryPaths::new(root);
        if !paths.root().is_dir() {
            return Err(Error::Config(format!(
                "Repository root is not a directory: {:?}",
                paths.root()
            )));
        }
        fs::create_dir_all(paths.tags_dir())?;

        let config = RepositoryConfig::load(&paths);
        let tags = TagService::new(&paths);
        log::info!(
            "[repository] Opened {:?} at {:?}",
            config.display_name(&paths),
            paths.root()
        );
        Ok(Self {
            paths,
            config,
            tags,
        })
    }

    /// Open the repository and take its exclusive lock.
    ///
    /// A lock held by another process is an error unless `force` is set, in
    /// which case it is taken over. The returned lock must be kept alive (and
    /// released) for as long as the repository is in use.
    pub async fn open_locked(
        root: impl Into<PathBuf>,
        force: bool,
    ) -> Result<(Self, RepositoryLock)> {
        let repo = Self::open(root)?;
        match acquire_repository_lock(repo.paths.root(), force).await? {
            LockAcquireResult::Acquired(lock) => Ok((repo, lock)),
            LockAcquireResult::Denied { holder, is_stale } => Err(Error::Lock(format!(
                "Repository is in use by {} (pid {}){}",
                holder.hostname,
                holder.pid,
                if is_stale { ", lock is stale" } else { "" }
            ))),
        }
    }

    pub fn paths(&self) -> &RepositoryPaths {
        &self.paths
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn name(&self) -> String {
        self.config.display_name(&self.paths)
    }

    pub fn tags(&self) -> &TagService {
        &self.tags
    }

    /// Create a new item. Tags set by the caller are kept; otherwise they are
    /// extracted from the content.
    ///
    /// Creating over an existing item replaces it, and its old tags are
    /// reconciled away.
    pub fn create_item(&self, mut item: Item, content: &str) -> Result<Item> {
        let item_ref = item.item_ref()?;
        let previous = self.stored_tags(&item_ref)?;
        if item.tags.is_empty() {
            item.tags = self.tags.extract_tags(content);
        }
        if item.title.is_empty() {
            item.title = derive_title(content, item.kind);
        }
        item.modified = Utc::now();

        let content = (!content.is_empty()).then_some(content);
        self.write_files(&item, &item_ref, content)?;
        self.tags.reconcile(&item_ref, &previous, &item.tags)?;
        Ok(item)
    }

    /// Save an item's metadata (and content, if given), reconciling against
    /// the tags recorded in its current metadata file.
    pub fn save(&self, item: &mut Item, content: Option<&str>) -> Result<TagDiff> {
        let item_ref = item.item_ref()?;
        let previous = self.stored_tags(&item_ref)?;
        item.modified = Utc::now();

        self.write_files(item, &item_ref, content)?;
        self.tags.reconcile(&item_ref, &previous, &item.tags)
    }

    /// Replace an item's content. Tags are re-extracted from the new content
    /// and the title is re-derived if it was never set.
    pub fn update_content(&self, item_ref: &ItemRef, content: &str) -> Result<Item> {
        let (mut item, _old) = self.load_item(item_ref)?;
        let previous = std::mem::take(&mut item.tags);
        item.tags = self.tags.extract_tags(content);

        if item.title.is_empty() || item.title == item.id {
            let title = derive_title(content, item.kind);
            if !title.is_empty() {
                item.title = title;
            }
        }
        item.modified = Utc::now();

        // Content first: a failed write leaves the metadata and index untouched
        self.write_content(item_ref, content)?;
        self.write_metadata(&item, item_ref)?;
        self.tags.reconcile(item_ref, &previous, &item.tags)?;
        Ok(item)
    }

    /// Remove an item's files and drop it from every tag it carried.
    pub fn delete_item(&self, item_ref: &ItemRef) -> Result<TagDiff> {
        let (item, _content) = self.load_item(item_ref)?;

        remove_if_exists(&self.paths.metadata_file(item_ref))?;
        remove_if_exists(&self.paths.content_file(item_ref))?;

        self.tags
            .reconciler()
            .remove_item(item_ref, &item.tags)
            .map_err(|e| {
                log::error!("[repository] Deleted {} but tag cleanup failed: {}", item_ref, e);
                e
            })
    }

    /// All loadable items of `kind`, most recently modified first.
    pub fn list_items(&self, kind: ItemType) -> Result<Vec<Item>> {
        let dir = self.paths.metadata_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items: Vec<Item> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| match read_located_metadata(kind, &path) {
                Ok(item) => Some(item),
                Err(e) => {
                    log::warn!("[repository] Skipping unreadable item {:?}: {}", path, e);
                    None
                }
            })
            .collect();

        items.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(items)
    }

    /// Rebuild the tag index from every item's metadata.
    pub fn rebuild_tag_index(&self) -> Result<RebuildReport> {
        let files = self.collect_metadata_files();
        log::info!("[repository] Rebuilding tag index from {} metadata files", files.len());

        let items: Vec<Item> = files
            .par_iter()
            .filter_map(|(kind, path)| match read_located_metadata(*kind, path) {
                Ok(item) => Some(item),
                Err(e) => {
                    log::warn!("[repository] Skipping {:?} during rebuild: {}", path, e);
                    None
                }
            })
            .collect();

        self.tags.reconciler().rebuild(items)
    }

    fn collect_metadata_files(&self) -> Vec<(ItemType, PathBuf)> {
        ItemType::ALL
            .iter()
            .map(|kind| (*kind, self.paths.metadata_dir(*kind)))
            .filter(|(_, dir)| dir.is_dir())
            .flat_map(|(kind, dir)| {
                WalkDir::new(dir)
                    .min_depth(1)
                    .max_depth(1)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| {
                        entry.file_type().is_file()
                            && entry.path().extension().and_then(|e| e.to_str()) == Some("json")
                    })
                    .map(move |entry| (kind, entry.into_path()))
            })
            .collect()
    }

    fn stored_tags(&self, item_ref: &ItemRef) -> Result<BTreeSet<String>> {
        let path = self.paths.metadata_file(item_ref);
        match read_metadata(&path) {
            Ok(item) => Ok(item.tags),
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e),
        }
    }

    fn write_files(&self, item: &Item, item_ref: &ItemRef, content: Option<&str>) -> Result<()> {
        if let Some(content) = content {
            self.write_content(item_ref, content)?;
        }
        self.write_metadata(item, item_ref)
    }

    fn write_metadata(&self, item: &Item, item_ref: &ItemRef) -> Result<()> {
        let path = self.paths.metadata_file(item_ref);
        ensure_parent(&path)?;
        let data = serde_json::to_vec_pretty(item)?;
        atomic_write_file(&path, &data)?;
        Ok(())
    }

    fn write_content(&self, item_ref: &ItemRef, content: &str) -> Result<()> {
        let path = self.paths.content_file(item_ref);
        ensure_parent(&path)?;
        atomic_write_file(&path, content.as_bytes())?;
        Ok(())
    }
}

impl ItemStore for Repository {
    fn load_item(&self, item_ref: &ItemRef) -> Result<(Item, String)> {
        let meta_path = self.paths.metadata_file(item_ref);
        let mut item = match read_metadata(&meta_path) {
            Ok(item) => item,
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ItemNotFound(item_ref.clone()))
            }
            Err(e) => return Err(e),
        };
        // The file location is authoritative for identity
        item.id = item_ref.id().to_string();
        item.kind = item_ref.kind();

        let content = match fs::read_to_string(self.paths.content_file(item_ref)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok((item, content))
    }

    fn save_item(&self, item: &Item, content: Option<&str>) -> Result<()> {
        let item_ref = item.item_ref()?;
        self.write_files(item, &item_ref, content)
    }
}

fn read_metadata(path: &Path) -> Result<Item> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|source| Error::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Metadata from a file under `.meta/<type>s/`. The file's location decides
/// the item's identity, whatever the JSON says.
fn read_located_metadata(kind: ItemType, path: &Path) -> Result<Item> {
    let mut item = read_metadata(path)?;
    if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
        item.id = id.to_string();
    }
    item.kind = kind;
    Ok(item)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
