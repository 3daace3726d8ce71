//! Repository layout and `config.json` handling.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::{ItemRef, ItemType};

/// Hidden metadata area inside the repository root
pub const META_DIR: &str = ".meta";
/// Tag index directory inside the metadata area
pub const TAGS_DIR: &str = "tags";
pub const CONFIG_FILE: &str = "config.json";
pub const LOCK_FILE: &str = "repository.lock";

/// Suffix for in-flight temporary files; never a valid `.json` name.
pub(crate) const TEMP_SUFFIX: &str = "notetags-tmp";

/// On-disk layout of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPaths {
    root: PathBuf,
}

impl RepositoryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.meta_dir().join(TAGS_DIR)
    }

    /// `.meta/<type>s`
    pub fn metadata_dir(&self, kind: ItemType) -> PathBuf {
        self.meta_dir().join(kind.dir_name())
    }

    /// `.meta/<type>s/<id>.json`
    pub fn metadata_file(&self, item: &ItemRef) -> PathBuf {
        self.metadata_dir(item.kind()).join(format!("{}.json", item.id()))
    }

    /// `<type>s/<id>.md`
    pub fn content_file(&self, item: &ItemRef) -> PathBuf {
        self.root
            .join(item.kind().dir_name())
            .join(format!("{}.md", item.id()))
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.meta_dir().join(LOCK_FILE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RepositoryConfig {
    /// Load `config.json`. A missing or unreadable file yields defaults.
    pub fn load(paths: &RepositoryPaths) -> Self {
        let path = paths.config_file();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("[config] Failed to read {:?}, using defaults: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("[config] Failed to parse {:?}, using defaults: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &RepositoryPaths) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write_file(&paths.config_file(), content.as_bytes())
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Configured name, or the root directory's base name.
    pub fn display_name(&self, paths: &RepositoryPaths) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        paths
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomic file write: write to a temp file in the same directory, sync, then rename.
/// Readers never observe a truncated or half-written file.
pub(crate) fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!(
        "{}.{}-{}.{}",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        TEMP_SUFFIX
    ));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
