//! Hashtag tagging for a file-based personal knowledge repository.
//!
//! Items (notes, bookmarks, tasks, workstreams, files) are stored as paired
//! metadata/content files. Hashtags written in item content are extracted and
//! kept in an inverted index under `.meta/tags`, one `<tag>.json` file per tag.

pub mod config;
pub mod error;
pub mod item;
pub mod repo_lock;
pub mod repository;
pub mod tags;

pub use config::{RepositoryConfig, RepositoryPaths};
pub use error::{Error, Result};
pub use item::{derive_title, Item, ItemRef, ItemType, TaskStatus};
pub use repository::{ItemStore, Repository};
pub use tags::{
    extract_tags, is_canonical_tag, RebuildReport, TagCount, TagDiff, TagIndexCache,
    TagIndexStore, TagService,
};
