// src/index.rs

use crate::allocator::assign_post_id;
use crate::error::IndexError;
use crate::group::GroupMapping;
use crate::model::{PostId, ScanSummary, SkippedFile};
use indexmap::IndexMap;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions (lowercase, no dot) of files that receive a post ID
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Relative path -> post ID, in first-insertion order.
///
/// Values are kept verbatim so hand-edited entries survive a load/save cycle.
/// Entries are only ever added; nothing renumbers or removes them.
#[derive(Debug, Default, Clone)]
pub struct PostIndex {
    entries: IndexMap<String, String>,
    loaded: bool,
    dirty: bool,
}

impl PostIndex {
    /// Loads a persisted index. A missing file is an empty index; anything
    /// unreadable or not a JSON object of strings is fatal.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No index at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(IndexError::IndexLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let entries: IndexMap<String, String> =
            serde_json::from_str(&text).map_err(|e| IndexError::IndexLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            entries,
            loaded: true,
            dirty: false,
        })
    }

    /// Writes the whole index to `path` via a temp file in the same directory
    /// followed by a rename, so readers never see a half-written file.
    pub fn save(&mut self, path: &Path) -> Result<(), IndexError> {
        let write_err = |source| IndexError::IndexWrite {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&self.to_json_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        self.dirty = false;
        Ok(())
    }

    /// Pretty JSON with 4-space indentation and a trailing newline.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        // A map of strings always serializes.
        if self.entries.serialize(&mut ser).is_ok() {
            out.push(b'\n');
        }
        out
    }

    pub fn insert(&mut self, path: String, id: &PostId) {
        self.entries.insert(path, id.to_string());
        self.dirty = true;
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, path: &str, id: &str) {
        self.entries.insert(path.to_string(), id.to_string());
        self.dirty = true;
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the index came from an existing file.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// True when entries were added since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// code -> sequence -> path. Entries that are not well-formed post IDs are left out.
    pub fn by_group(&self) -> BTreeMap<String, BTreeMap<u32, String>> {
        let mut groups: BTreeMap<String, BTreeMap<u32, String>> = BTreeMap::new();
        for (path, raw) in self.iter() {
            if let Some(id) = PostId::parse(raw) {
                groups
                    .entry(id.code.to_string())
                    .or_default()
                    .insert(id.sequence, path.to_string());
            }
        }
        groups
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|c| ext.eq_ignore_ascii_case(c)))
        .unwrap_or(false)
}

/// Qualifying files under `root` as `/`-separated relative paths, sorted
/// component-wise so ID assignment never depends on filesystem order.
pub fn scan_images(root: &Path, summary: &mut ScanSummary) -> Vec<String> {
    let mut found: Vec<Vec<String>> = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() || !path.is_file() || !is_image_file(path) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(s) => parts.push(s.to_string()),
                    None => break,
                },
                _ => break,
            }
        }
        if parts.len() != relative.components().count() {
            warn!("Skipping non UTF-8 path {}", path.display());
            summary.skipped.push(SkippedFile {
                path: relative.to_string_lossy().into_owned(),
                reason: "path is not valid UTF-8".to_string(),
            });
            continue;
        }
        found.push(parts);
    }

    found.sort();
    found.into_iter().map(|parts| parts.join("/")).collect()
}

/// Loads the index at `index_path`, assigns IDs to every new qualifying file
/// under `root` in sorted order, and writes the index back.
///
/// Existing entries are never changed. Files whose ID cannot be assigned are
/// logged, reported in the summary and left out of the index.
pub fn build_index(
    root: &Path,
    index_path: &Path,
    mapping: &GroupMapping,
) -> Result<(PostIndex, ScanSummary), IndexError> {
    if !root.is_dir() {
        return Err(IndexError::DirectoryNotFound(root.to_path_buf()));
    }
    let mut index = PostIndex::load(index_path)?;
    if index.is_loaded() {
        info!(
            "Loaded {} existing entries from {}",
            index.len(),
            index_path.display()
        );
    } else {
        info!("Creating new index at {}", index_path.display());
    }

    let mut summary = ScanSummary::default();
    let files = scan_images(root, &mut summary);
    summary.qualifying = files.len();

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_message("Indexing files");

    for relative in files {
        debug!("Processing file: {}", relative);
        if index.contains(&relative) {
            summary.already_indexed += 1;
        } else {
            match assign_post_id(&relative, &index, mapping) {
                Ok(id) => {
                    debug!("Assigned {} to {}", id, relative);
                    index.insert(relative, &id);
                    summary.assigned += 1;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", relative, e);
                    summary.skipped.push(SkippedFile {
                        path: relative,
                        reason: e.to_string(),
                    });
                }
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("Indexing complete");

    if !index.is_dirty() {
        debug!("No new files, rewriting unchanged index");
    }
    index.save(index_path)?;
    info!("Index saved to {}", index_path.display());
    Ok((index, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn assets() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        touch(&root, "New England Offshore Wind Discussion/image1.png");
        touch(&root, "Protect Our Coast - NJ Community Group/image2.jpg");
        touch(&root, "Unknown Group/image3.gif");
        touch(&root, "not_an_image.txt");
        dir
    }

    fn read_json(path: &Path) -> IndexMap<String, String> {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn pairs(index: &PostIndex) -> Vec<(String, String)> {
        index
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn scan_assigns_ids_and_adds_new_files_incrementally() {
        let dir = assets();
        let root = dir.path().join("assets");
        let index_file = dir.path().join("file_index.json");
        let mapping = GroupMapping::default();

        let (_, summary) = build_index(&root, &index_file, &mapping).unwrap();
        assert_eq!(summary.assigned, 3);
        assert_eq!(
            read_json(&index_file).into_iter().collect::<Vec<_>>(),
            vec![
                (
                    "New England Offshore Wind Discussion/image1.png".to_string(),
                    "NEOW-0001".to_string()
                ),
                (
                    "Protect Our Coast - NJ Community Group/image2.jpg".to_string(),
                    "PCNJ-0001".to_string()
                ),
                ("Unknown Group/image3.gif".to_string(), "MISC-0001".to_string()),
            ]
        );

        touch(&root, "New England Offshore Wind Discussion/image4.png");
        let (index, summary) = build_index(&root, &index_file, &mapping).unwrap();
        assert_eq!(summary.assigned, 1);
        assert_eq!(summary.already_indexed, 3);
        assert_eq!(
            index.get("New England Offshore Wind Discussion/image4.png"),
            Some("NEOW-0002")
        );
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn rescan_without_changes_is_byte_identical() {
        let dir = assets();
        let root = dir.path().join("assets");
        let index_file = dir.path().join("file_index.json");
        let mapping = GroupMapping::default();

        build_index(&root, &index_file, &mapping).unwrap();
        let first = fs::read(&index_file).unwrap();
        let (index, summary) = build_index(&root, &index_file, &mapping).unwrap();
        let second = fs::read(&index_file).unwrap();

        assert_eq!(first, second);
        assert_eq!(summary.assigned, 0);
        assert!(index.is_loaded());
        assert!(!index.is_dirty());
    }

    #[test]
    fn same_group_files_are_numbered_in_path_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        touch(&root, "GroupA/y.jpg");
        touch(&root, "GroupA/x.png");
        let index_file = dir.path().join("index.json");
        let mapping =
            GroupMapping::from_pairs([("GroupA".to_string(), "GRPA".to_string())]).unwrap();

        let (index, _) = build_index(&root, &index_file, &mapping).unwrap();
        assert_eq!(
            pairs(&index),
            vec![
                ("GroupA/x.png".to_string(), "GRPA-0001".to_string()),
                ("GroupA/y.jpg".to_string(), "GRPA-0002".to_string()),
            ]
        );
    }

    #[test]
    fn numbering_stays_contiguous_across_incremental_scans() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        let index_file = dir.path().join("index.json");
        let mapping = GroupMapping::default();

        for name in ["c.png", "a.png", "b.png", "e.png", "d.png"] {
            touch(&root, &format!("Save_LBI/{name}"));
            build_index(&root, &index_file, &mapping).unwrap();
        }

        let index = PostIndex::load(&index_file).unwrap();
        let mut seqs: Vec<u32> = index.by_group()["SLBI"].keys().copied().collect();
        seqs.sort();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(index.get("Save_LBI/c.png"), Some("SLBI-0001"));
        assert_eq!(index.get("Save_LBI/d.png"), Some("SLBI-0005"));
    }

    #[test]
    fn extensions_are_matched_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        touch(&root, "a.JPG");
        touch(&root, "b.Jpeg");
        touch(&root, "c.bmp");
        touch(&root, "d.webp");
        touch(&root, "noext");
        fs::create_dir_all(root.join("dir.png")).unwrap();

        let mut summary = ScanSummary::default();
        assert_eq!(
            scan_images(&root, &mut summary),
            vec!["a.JPG".to_string(), "b.Jpeg".to_string(), "c.bmp".to_string()]
        );
    }

    #[test]
    fn existing_entries_are_preserved_verbatim() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        touch(&root, "GroupA/new.png");
        let index_file = dir.path().join("index.json");
        fs::write(
            &index_file,
            r#"{"gone.png": "GRPA-0003", "g.png": "GRPA-XYZ"}"#,
        )
        .unwrap();
        let mapping =
            GroupMapping::from_pairs([("GroupA".to_string(), "GRPA".to_string())]).unwrap();

        let (index, _) = build_index(&root, &index_file, &mapping).unwrap();
        assert_eq!(
            pairs(&index),
            vec![
                ("gone.png".to_string(), "GRPA-0003".to_string()),
                ("g.png".to_string(), "GRPA-XYZ".to_string()),
                ("GroupA/new.png".to_string(), "GRPA-0004".to_string()),
            ]
        );
    }

    #[test]
    fn corrupt_index_is_fatal_and_left_untouched() {
        let dir = assets();
        let root = dir.path().join("assets");
        let index_file = dir.path().join("file_index.json");
        fs::write(&index_file, "{ not json").unwrap();

        let err = build_index(&root, &index_file, &GroupMapping::default()).unwrap_err();
        assert!(matches!(err, IndexError::IndexLoad { .. }));
        assert_eq!(fs::read_to_string(&index_file).unwrap(), "{ not json");

        fs::write(&index_file, r#"{"a.png": 3}"#).unwrap();
        assert!(matches!(
            PostIndex::load(&index_file),
            Err(IndexError::IndexLoad { .. })
        ));
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = build_index(
            &dir.path().join("nope"),
            &dir.path().join("index.json"),
            &GroupMapping::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::DirectoryNotFound(_)));
        assert!(!dir.path().join("index.json").exists());
    }

    #[test]
    fn empty_directory_still_writes_an_index() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("assets");
        fs::create_dir_all(&root).unwrap();
        let index_file = dir.path().join("out/index.json");

        let (index, summary) = build_index(&root, &index_file, &GroupMapping::default()).unwrap();
        assert!(index.is_empty());
        assert_eq!(summary, ScanSummary::default());
        assert_eq!(fs::read_to_string(&index_file).unwrap(), "{}\n");
    }

    #[test]
    fn saved_json_uses_four_space_indent() {
        let mut index = PostIndex::default();
        index.insert_raw("a/b.png", "ABCD-0001");
        assert_eq!(
            String::from_utf8(index.to_json_bytes()).unwrap(),
            "{\n    \"a/b.png\": \"ABCD-0001\"\n}\n"
        );
    }

    #[test]
    fn save_replaces_the_old_file_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_index.json");
        fs::write(&path, "{\"old.png\": \"MISC-0001\"}\n").unwrap();

        let mut index = PostIndex::default();
        index.insert_raw("new.png", "MISC-0002");
        index.save(&path).unwrap();

        assert!(!index.is_dirty());
        assert_eq!(
            pairs(&PostIndex::load(&path).unwrap()),
            vec![("new.png".to_string(), "MISC-0002".to_string())]
        );
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["file_index.json".to_string()]);
    }

    #[test]
    fn failed_save_keeps_the_target_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file_index.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "kept").unwrap();

        let mut index = PostIndex::default();
        index.insert_raw("a.png", "MISC-0001");
        assert!(matches!(
            index.save(&target),
            Err(IndexError::IndexWrite { .. })
        ));

        assert!(index.is_dirty());
        assert_eq!(fs::read_to_string(target.join("keep.txt")).unwrap(), "kept");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn by_group_skips_malformed_ids() {
        let mut index = PostIndex::default();
        index.insert_raw("a.png", "NEOW-0002");
        index.insert_raw("b.png", "NEOW-0001");
        index.insert_raw("c.png", "oops");
        let groups = index.by_group();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["NEOW"][&1], "b.png");
        assert_eq!(groups["NEOW"][&2], "a.png");
    }
}
