//! Tag index persistence: one `<tag>.json` file per tag under `.meta/tags`,
//! holding a JSON array of `<id>:<type>` strings.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::{atomic_write_file, RepositoryPaths};
use crate::error::{Error, Result};
use crate::item::ItemRef;

use super::extract::is_canonical_tag;

const TAG_FILE_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct TagIndexStore {
    dir: PathBuf,
}

impl TagIndexStore {
    pub fn new(paths: &RepositoryPaths) -> Self {
        Self::at(paths.tags_dir())
    }

    /// Store rooted at an explicit tags directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tag_path(&self, tag: &str) -> Result<PathBuf> {
        if !is_canonical_tag(tag) {
            return Err(Error::InvalidTag(tag.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", tag, TAG_FILE_EXT)))
    }

    /// Members recorded for `tag`, in insertion order. Unknown tags have no members.
    pub fn read(&self, tag: &str) -> Result<Vec<ItemRef>> {
        let path = self.tag_path(tag)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::TagRead { path, source }),
        };

        serde_json::from_slice(&data).map_err(|source| Error::TagMalformed { path, source })
    }

    /// Replace the record for `tag`. An empty member list deletes the record.
    ///
    /// The previous record stays intact if the write fails.
    pub fn write(&self, tag: &str, members: &[ItemRef]) -> Result<()> {
        let path = self.tag_path(tag)?;

        if members.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("[tag_index] Removed empty tag {:?}", tag);
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(source) => Err(Error::TagWrite { path, source }),
            };
        }

        let mut seen = HashSet::with_capacity(members.len());
        let unique: Vec<&ItemRef> = members.iter().filter(|m| seen.insert(*m)).collect();
        let data = serde_json::to_vec_pretty(&unique)?;

        fs::create_dir_all(&self.dir).map_err(|source| Error::TagWrite {
            path: self.dir.clone(),
            source,
        })?;
        atomic_write_file(&path, &data).map_err(|source| Error::TagWrite {
            path: path.clone(),
            source,
        })?;

        log::debug!("[tag_index] Wrote {} members for tag {:?}", unique.len(), tag);
        Ok(())
    }

    /// Names of all tags that currently have a record.
    pub fn list_tags(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => {
                return Err(Error::TagRead {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut tags = BTreeSet::new();
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TAG_FILE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_canonical_tag(stem) {
                tags.insert(stem.to_string());
            }
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;
    use tempfile::TempDir;

    fn note(id: &str) -> ItemRef {
        ItemRef::new(id, ItemType::Note).unwrap()
    }

    fn store() -> (TempDir, TagIndexStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = TagIndexStore::at(temp_dir.path().join(".meta").join("tags"));
        (temp_dir, store)
    }

    #[test]
    fn test_read_unknown_tag_is_empty() {
        let (_dir, store) = store();
        assert!(store.read("nothing").unwrap().is_empty());
        assert!(store.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let (_dir, store) = store();
        let members = vec![note("b"), note("a"), note("c")];
        store.write("project", &members).unwrap();

        assert_eq!(store.read("project").unwrap(), members);
        let on_disk = fs::read_to_string(store.dir().join("project.json")).unwrap();
        let raw: Vec<String> = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(raw, vec!["b:note", "a:note", "c:note"]);
    }

    #[test]
    fn test_write_drops_duplicates() {
        let (_dir, store) = store();
        store.write("t", &[note("a"), note("b"), note("a")]).unwrap();
        assert_eq!(store.read("t").unwrap(), vec![note("a"), note("b")]);
    }

    #[test]
    fn test_empty_write_deletes_record() {
        let (_dir, store) = store();
        store.write("gone", &[note("a")]).unwrap();
        assert!(store.list_tags().unwrap().contains("gone"));

        store.write("gone", &[]).unwrap();
        assert!(!store.dir().join("gone.json").exists());
        assert!(!store.list_tags().unwrap().contains("gone"));

        // Deleting an absent record is fine
        store.write("gone", &[]).unwrap();
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{\"not\": \"an array\"}").unwrap();
        fs::write(store.dir().join("badid.json"), "[\"no-delimiter\"]").unwrap();

        assert!(matches!(store.read("broken"), Err(Error::TagMalformed { .. })));
        assert!(matches!(store.read("badid"), Err(Error::TagMalformed { .. })));
    }

    #[test]
    fn test_rejects_non_canonical_names() {
        let (_dir, store) = store();
        assert!(matches!(store.read("../escape"), Err(Error::InvalidTag(_))));
        assert!(matches!(store.write("a b", &[note("a")]), Err(Error::InvalidTag(_))));
        assert!(matches!(store.write("", &[note("a")]), Err(Error::InvalidTag(_))));
    }

    #[test]
    fn test_list_tags_ignores_foreign_files() {
        let (_dir, store) = store();
        store.write("alpha", &[note("a")]).unwrap();
        store.write("work.important", &[note("a")]).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        fs::write(store.dir().join("beta.json.1-0.notetags-tmp"), "[").unwrap();
        fs::create_dir(store.dir().join("nested.json")).unwrap();

        let tags: Vec<String> = store.list_tags().unwrap().into_iter().collect();
        assert_eq!(tags, vec!["alpha", "work.important"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_keeps_previous_record() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store.write("keep", &[note("a")]).unwrap();

        fs::set_permissions(store.dir(), fs::Permissions::from_mode(0o555)).unwrap();
        let result = store.write("keep", &[note("a"), note("b")]);
        fs::set_permissions(store.dir(), fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions; only assert when the write was refused
        if result.is_err() {
            assert!(matches!(result, Err(Error::TagWrite { .. })));
            assert_eq!(store.read("keep").unwrap(), vec![note("a")]);
        }
    }
}
