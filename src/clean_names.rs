// src/clean_names.rs

use crate::error::IndexError;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, PartialEq)]
pub struct RenameSummary {
    pub renamed: usize,
    pub failed: usize,
}

/// `file names with spaces.png` -> `file_names_with_spaces.png`. `None` when
/// there is nothing to change.
pub fn clean_name(name: &str) -> Option<String> {
    if !name.chars().any(char::is_whitespace) {
        return None;
    }
    Some(
        name.chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect(),
    )
}

/// Renames every file and directory below `root` whose name contains
/// whitespace. Children are handled before their parents so no path goes stale
/// mid-walk. Existing targets are never overwritten.
pub fn rename_spaces(root: &Path) -> Result<RenameSummary, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::DirectoryNotFound(root.to_path_buf()));
    }

    let paths: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                warn!("Failed to read entry: {e}");
                None
            }
        })
        .collect();

    let mut summary = RenameSummary::default();
    for path in paths {
        let Some(new_name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(clean_name)
        else {
            continue;
        };
        let new_path = path.with_file_name(new_name);
        if new_path.exists() {
            warn!(
                "Not renaming '{}': '{}' already exists",
                path.display(),
                new_path.display()
            );
            summary.failed += 1;
            continue;
        }
        match std::fs::rename(&path, &new_path) {
            Ok(()) => {
                info!("Renamed '{}' to '{}'", path.display(), new_path.display());
                summary.renamed += 1;
            }
            Err(e) => {
                error!("Error renaming '{}': {}", path.display(), e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn clean_name_replaces_whitespace_only_when_present() {
        assert_eq!(clean_name("a b\tc.png").as_deref(), Some("a_b_c.png"));
        assert_eq!(clean_name("already_clean.png"), None);
    }

    #[test]
    fn nested_directories_and_files_are_renamed() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        let group = root.join("Save LBI");
        fs::create_dir_all(group.join("sub dir")).unwrap();
        fs::write(group.join("sub dir/my image.png"), b"").unwrap();
        fs::write(group.join("plain.png"), b"").unwrap();

        let summary = rename_spaces(root).unwrap();
        assert_eq!(summary, RenameSummary { renamed: 3, failed: 0 });
        assert!(root.join("Save_LBI/sub_dir/my_image.png").is_file());
        assert!(root.join("Save_LBI/plain.png").is_file());
        assert!(!group.exists());
    }

    #[test]
    fn existing_targets_are_not_clobbered() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("a b.png"), b"spaced").unwrap();
        fs::write(dir.path().join("a_b.png"), b"clean").unwrap();

        let summary = rename_spaces(dir.path()).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(fs::read(dir.path().join("a_b.png")).unwrap(), b"clean");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(rename_spaces(&dir.path().join("nope")).is_err());
    }
}
