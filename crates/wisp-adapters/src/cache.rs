//! The on-disk review cache: one JSON document per workspace root, written
//! atomically (temp-then-rename) so a crash mid-write never corrupts it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wisp_core::{CacheEntry, Violation, VisitedFileRecord};

use crate::error::CacheError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    /// Keyed by `(filename, fileSHA)` joined with `::`.
    review_files: HashMap<String, CachedReview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReview {
    filename: String,
    file_sha: String,
    rule_ids: Vec<String>,
    cost: f64,
    violations: Vec<Violation>,
    visited_files: Vec<VisitedFileRecord>,
}

pub struct ReviewCache {
    path: PathBuf,
    document: CacheDocument,
}

fn cache_key(filename: &str, file_sha: &str) -> String {
    format!("{filename}::{file_sha}")
}

impl ReviewCache {
    /// Load (or initialize) the cache document for a canonicalised
    /// workspace root. The on-disk filename is a hash of that root so two
    /// checkouts of the same repository never collide.
    pub fn open(cache_dir: &Path, workspace_root: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(cache_dir).map_err(|source| CacheError::Write {
            path: cache_dir.display().to_string(),
            source,
        })?;

        let root_hash = wisp_core::model::hash_str(&workspace_root.to_string_lossy());
        let path = cache_dir.join(format!("review-cache-{root_hash}.json"));

        let document = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(_) => {
                    preserve_corrupt_cache(&path, &content);
                    CacheDocument::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(Self { path, document })
    }

    /// `hasReviewedFileWithSameHash`: a hit requires the stored rule-id set
    /// to equal the current one AND every visited file's freshness token to
    /// still match. Returned violations are marked `is_cached = true`.
    pub fn lookup(
        &self,
        filename: &str,
        file_sha: &str,
        rule_ids: &[String],
        freshness: impl Fn(&str) -> Option<String>,
    ) -> Option<Vec<Violation>> {
        let entry = self.document.review_files.get(&cache_key(filename, file_sha))?;

        let mut current_rule_ids = rule_ids.to_vec();
        current_rule_ids.sort();
        let mut stored_rule_ids = entry.rule_ids.clone();
        stored_rule_ids.sort();
        if current_rule_ids != stored_rule_ids {
            return None;
        }

        for visited in &entry.visited_files {
            let Some(current_token) = freshness(&visited.filename) else {
                return None;
            };
            if current_token != visited.freshness_token {
                return None;
            }
        }

        Some(
            entry
                .violations
                .iter()
                .cloned()
                .map(|mut v| {
                    v.is_cached = true;
                    v
                })
                .collect(),
        )
    }

    /// Insert (or replace) one completed review's row, skipping visited
    /// filenames already present for this entry.
    pub fn record(&mut self, entry: CacheEntry) {
        let key = cache_key(&entry.filename, &entry.file_sha);
        let mut visited_files = entry.visited_files;
        visited_files.sort_by(|a, b| a.filename.cmp(&b.filename));
        visited_files.dedup_by(|a, b| a.filename == b.filename);

        self.document.review_files.insert(
            key,
            CachedReview {
                filename: entry.filename,
                file_sha: entry.file_sha,
                rule_ids: entry.rule_ids,
                cost: entry.cost,
                violations: entry.violations,
                visited_files,
            },
        );
    }

    /// Drop every row.
    pub fn purge(&mut self) {
        self.document.review_files.clear();
    }

    /// Persist the document atomically. A failure here MUST NOT fail the
    /// review that produced it; callers log and move on.
    pub fn flush(&self) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(&self.document)?;
        write_atomic(&self.path, &content)
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|source| CacheError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| CacheError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn preserve_corrupt_cache(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_core::{CodebaseRule, LineReference, Side};

    fn violation() -> Violation {
        Violation {
            description: "bad thing".to_string(),
            line: LineReference::new(1, 1, Side::Right).unwrap(),
            rule: CodebaseRule::new("r", "body", None, vec![]),
            validation_reasoning: Some("because".to_string()),
            is_cached: false,
        }
    }

    #[test]
    fn records_and_retrieves_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let mut cache = ReviewCache::open(dir.path(), workspace.path()).unwrap();

        cache.record(CacheEntry {
            filename: "a.rs".to_string(),
            file_sha: "sha1".to_string(),
            rule_ids: vec!["r1".to_string()],
            violations: vec![violation()],
            visited_files: vec![VisitedFileRecord {
                filename: "b.rs".to_string(),
                freshness_token: "tok1".to_string(),
            }],
            cost: 0.01,
        });

        let hit = cache
            .lookup("a.rs", "sha1", &["r1".to_string()], |_| Some("tok1".to_string()))
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert!(hit[0].is_cached);
    }

    #[test]
    fn stale_freshness_token_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let mut cache = ReviewCache::open(dir.path(), workspace.path()).unwrap();

        cache.record(CacheEntry {
            filename: "a.rs".to_string(),
            file_sha: "sha1".to_string(),
            rule_ids: vec!["r1".to_string()],
            violations: vec![violation()],
            visited_files: vec![VisitedFileRecord {
                filename: "b.rs".to_string(),
                freshness_token: "tok1".to_string(),
            }],
            cost: 0.01,
        });

        let miss = cache.lookup("a.rs", "sha1", &["r1".to_string()], |_| Some("tok2".to_string()));
        assert!(miss.is_none());
    }

    #[test]
    fn different_rule_set_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let mut cache = ReviewCache::open(dir.path(), workspace.path()).unwrap();

        cache.record(CacheEntry {
            filename: "a.rs".to_string(),
            file_sha: "sha1".to_string(),
            rule_ids: vec!["r1".to_string()],
            violations: vec![violation()],
            visited_files: vec![],
            cost: 0.01,
        });

        let miss = cache.lookup("a.rs", "sha1", &["r2".to_string()], |_| None);
        assert!(miss.is_none());
    }

    #[test]
    fn flush_and_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let mut cache = ReviewCache::open(dir.path(), workspace.path()).unwrap();
        cache.record(CacheEntry {
            filename: "a.rs".to_string(),
            file_sha: "sha1".to_string(),
            rule_ids: vec!["r1".to_string()],
            violations: vec![violation()],
            visited_files: vec![],
            cost: 0.01,
        });
        cache.flush().unwrap();

        let reopened = ReviewCache::open(dir.path(), workspace.path()).unwrap();
        let hit = reopened.lookup("a.rs", "sha1", &["r1".to_string()], |_| None);
        assert!(hit.is_some());
    }

    #[test]
    fn purge_drops_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let mut cache = ReviewCache::open(dir.path(), workspace.path()).unwrap();
        cache.record(CacheEntry {
            filename: "a.rs".to_string(),
            file_sha: "sha1".to_string(),
            rule_ids: vec!["r1".to_string()],
            violations: vec![violation()],
            visited_files: vec![],
            cost: 0.01,
        });
        cache.purge();
        assert!(cache.lookup("a.rs", "sha1", &["r1".to_string()], |_| None).is_none());
    }
}
