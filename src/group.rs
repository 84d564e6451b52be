// src/group.rs

//! Maps a file's enclosing directory to a group code.
//!
//! Only the immediate parent directory is examined. A case-insensitive match on
//! the full name is tried first. Failing that, both sides are reduced to their
//! lowercased alphanumerics, so a directory named
//! `New England Offshore Wind Discussion` matches the key
//! `New_England_Offshore_Wind_Discussion`, before or after `clean-names` runs.
//! A parent equal to a code itself (`neow/`) also matches.

use crate::error::MappingError;
use crate::model::GroupCode;
use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

const DEFAULT_GROUPS: &[(&str, &str)] = &[
    ("ACK_4_Whales", "ACKW"),
    ("Edge_Case_Tests", "MISC"),
    ("Fishermen_Steward", "FIST"),
    ("Fishermen_Against_Offshore_Wind", "FAWM"),
    ("Green_Oceans", "MISC"),
    ("LICFA", "LICF"),
    ("New_England_Fishermen_s_Stewardship_Association", "NEFS"),
    ("New_England_Offshore_Wind_Discussion", "NEOW"),
    ("Protect_Our_Coast_LINY", "PCLI"),
    ("Protect_Our_Coast_NJ_community_group", "PCNJ"),
    ("Protect_Our_Oceans_MA", "PCMA"),
    ("Saltwater_Scam", "SLSC"),
    ("Save_LBI", "SLBI"),
];

#[derive(Debug, Clone)]
struct GroupEntry {
    name: String,
    folded: String,
    key: String,
    code: GroupCode,
}

/// Ordered group name -> code table. Immutable once built.
#[derive(Debug, Clone)]
pub struct GroupMapping {
    entries: Vec<GroupEntry>,
}

impl GroupEntry {
    fn new(name: String, code: GroupCode) -> Self {
        Self {
            folded: name.to_lowercase(),
            key: normalize(&name),
            name,
            code,
        }
    }
}

impl Default for GroupMapping {
    fn default() -> Self {
        let entries = DEFAULT_GROUPS
            .iter()
            .map(|&(name, code)| {
                GroupEntry::new(
                    name.to_string(),
                    GroupCode::new(code).unwrap_or_else(GroupCode::fallback),
                )
            })
            .collect();
        Self { entries }
    }
}

impl GroupMapping {
    /// Builds a mapping, rejecting any code that is not four uppercase letters.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, MappingError> {
        let mut entries = Vec::new();
        for (name, code) in pairs {
            let Some(parsed) = GroupCode::new(&code) else {
                return Err(MappingError::InvalidCode { name, code });
            };
            entries.push(GroupEntry::new(name, parsed));
        }
        Ok(Self { entries })
    }

    /// Reads a JSON object `{ "Group Name": "CODE", ... }`, keeping document order.
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let text = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: IndexMap<String, String> =
            serde_json::from_str(&text).map_err(|source| MappingError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_pairs(raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, dir_name: &str) -> Option<&GroupCode> {
        let folded = dir_name.to_lowercase();
        let wanted = normalize(dir_name);
        if wanted.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.folded == folded)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.key == wanted || normalize(e.code.as_str()) == wanted)
            })
            .map(|e| {
                debug!("Directory '{}' matched group '{}'", dir_name, e.name);
                &e.code
            })
    }
}

/// Resolves the group code of `path` from its parent directory name.
/// Never fails: anything unmatched lands in `MISC`.
pub fn resolve_group_code(path: &Path, mapping: &GroupMapping) -> GroupCode {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy())
        .and_then(|name| mapping.lookup(&name).cloned())
        .unwrap_or_else(GroupCode::fallback)
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
