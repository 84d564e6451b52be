// src/allocator.rs

use crate::error::AllocError;
use crate::group::{resolve_group_code, GroupMapping};
use crate::index::PostIndex;
use crate::model::{GroupCode, PostId, MAX_SEQUENCE};
use std::path::Path;
use tracing::warn;

/// Next free sequence number for `code`: one past the highest existing
/// suffix, or 1 if the group has no entries yet.
///
/// The index is the only state consulted, so the result is reproducible.
/// Entries with a non-numeric suffix are logged and ignored.
pub fn next_id(code: &GroupCode, index: &PostIndex) -> u32 {
    let prefix = format!("{code}-");
    let mut max_id = 0;
    for (path, post_id) in index.iter() {
        let Some(suffix) = post_id.strip_prefix(&prefix) else {
            continue;
        };
        match suffix.parse::<u32>() {
            Ok(n) => max_id = max_id.max(n),
            Err(_) => warn!("Invalid post ID format: {} (for {})", post_id, path),
        }
    }
    max_id.saturating_add(1)
}

/// Computes the post ID `relative_path` would receive. The index is not touched;
/// inserting the pair is up to the caller.
pub fn assign_post_id(
    relative_path: &str,
    index: &PostIndex,
    mapping: &GroupMapping,
) -> Result<PostId, AllocError> {
    let path = Path::new(relative_path);
    if path.file_name().is_none() {
        return Err(AllocError::GroupResolution(relative_path.to_string()));
    }

    let code = resolve_group_code(path, mapping);
    let sequence = next_id(&code, index);
    if sequence > MAX_SEQUENCE {
        return Err(AllocError::SequenceExhausted {
            code: code.to_string(),
            max: MAX_SEQUENCE,
        });
    }
    Ok(PostId { code, sequence })
}
