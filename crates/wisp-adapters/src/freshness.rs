//! Freshness tokens for visited-file cache invalidation (§4.G).
//!
//! A token is an opaque hash of a file's modification time. It is cheap to
//! recompute and changes whenever the file is touched, even if its content
//! round-trips back to the same bytes — matching the product's own
//! timestamp-based invalidation rather than a full content re-hash.

use std::path::Path;

use wisp_core::model::hash_str;

use crate::sandbox;

/// Compute the current freshness token for `relative_path` under
/// `workspace_root`, or `None` if the file can no longer be resolved or
/// stat'd (treated as a miss by the cache lookup).
pub fn freshness_token(workspace_root: &Path, relative_path: &str) -> Option<String> {
    let resolved = sandbox::resolve(workspace_root, Path::new(relative_path)).ok()?;
    let metadata = std::fs::metadata(&resolved.absolute).ok()?;
    let modified = metadata.modified().ok()?;
    let nanos = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_nanos();
    Some(hash_str(&nanos.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_changes_when_file_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let before = freshness_token(dir.path(), "a.txt").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let after = freshness_token(dir.path(), "a.txt").unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn missing_file_has_no_token() {
        let dir = tempfile::tempdir().unwrap();
        assert!(freshness_token(dir.path(), "missing.txt").is_none());
    }
}
