//! Core data model: file changes, rules, line references, and violations.
//!
//! Every type here is immutable once constructed; mutation during a review
//! happens by accreting new `Violation`s, never by editing a `FileChange` or
//! `CodebaseRule` in place.

use serde::{Deserialize, Serialize};

/// FNV-1a over raw bytes, used for content-addressing patches and rule ids.
/// Not cryptographic; we only need stable, collision-resistant-enough keys
/// for cache lookups.
pub fn hash_bytes(content: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", hash)
}

pub fn hash_str(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// The lifecycle state of a changed file relative to the diff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Removed,
    Modified,
    Renamed,
    Copied,
    Changed,
    Unchanged,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Removed => "removed",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Renamed => "renamed",
            ChangeStatus::Copied => "copied",
            ChangeStatus::Changed => "changed",
            ChangeStatus::Unchanged => "unchanged",
        }
    }
}

/// One changed file surfaced by a Change Source.
///
/// Immutable after construction. `sha` is derived from the patch text, not
/// file content, so a file whose content is identical but whose diff context
/// shifted (e.g. an unrelated earlier hunk moved) gets a new cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: ChangeStatus,
    pub patch: Option<String>,
    pub additions: u32,
    pub deletions: u32,
    pub sha: String,
}

impl FileChange {
    pub fn new(
        filename: impl Into<String>,
        status: ChangeStatus,
        patch: Option<String>,
        additions: u32,
        deletions: u32,
    ) -> Self {
        let sha = hash_str(patch.as_deref().unwrap_or(""));
        Self {
            filename: filename.into(),
            status,
            patch,
            additions,
            deletions,
            sha,
        }
    }
}

/// A user-authored rule loaded from a `.wispbit/rules/*.md` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseRule {
    pub id: String,
    pub name: String,
    pub body: String,
    /// Workspace-relative directory the rule is scoped to (the directory
    /// containing the `.wispbit` directory it was discovered under), or
    /// `None` for a workspace-root rule.
    pub directory: Option<String>,
    /// Include/exclude glob patterns. A leading `!` marks an exclusion.
    pub include: Vec<String>,
}

impl CodebaseRule {
    /// Stable id derived from (directory, name) — two rules collide iff
    /// both fields match.
    pub fn make_id(directory: Option<&str>, name: &str) -> String {
        hash_str(&format!("{}::{}", directory.unwrap_or(""), name))
    }

    pub fn new(
        name: impl Into<String>,
        raw_body: &str,
        directory: Option<String>,
        include: Vec<String>,
    ) -> Self {
        let name = name.into();
        let id = Self::make_id(directory.as_deref(), &name);
        Self {
            id,
            name,
            body: normalize_rule_body(raw_body),
            directory,
            include,
        }
    }
}

/// Glyphs stripped from rule bodies: checkmarks and crosses that author
/// tooling sometimes prepends to rule statements but that add no semantic
/// content for the reviewer prompt.
const STRIPPED_GLYPHS: &[char] = &['\u{2705}', '\u{274C}', '\u{2713}', '\u{2717}', '\u{274E}'];

/// Strip a leading H1–H3 heading line (never H4+) and the glyph set above.
pub fn normalize_rule_body(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();

    // Drop leading blank lines, then a single heading line if present.
    let mut start = 0;
    while start < lines.len() && lines[start].trim().is_empty() {
        start += 1;
    }
    if start < lines.len() {
        let trimmed = lines[start].trim_start();
        let is_heading = (trimmed.starts_with("# ") || trimmed == "#")
            || (trimmed.starts_with("## ") || trimmed == "##")
            || (trimmed.starts_with("### ") || trimmed == "###");
        let is_h4_plus = trimmed.starts_with("####");
        if is_heading && !is_h4_plus {
            lines.remove(start);
        }
    }

    let joined = lines.join("\n");
    let mut cleaned = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if !STRIPPED_GLYPHS.contains(&ch) {
            cleaned.push(ch);
        }
    }
    cleaned.trim().to_string()
}

/// Which side of the diff a line number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// An inclusive line range pinned to one side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReference {
    pub start: u32,
    pub end: u32,
    pub side: Side,
}

impl LineReference {
    pub fn new(start: u32, end: u32, side: Side) -> Result<Self, String> {
        if start < 1 {
            return Err(format!("line reference start must be >= 1 (got {start})"));
        }
        if end < start {
            return Err(format!(
                "line reference end ({end}) must be >= start ({start})"
            ));
        }
        Ok(Self { start, end, side })
    }
}

/// A rule violation accepted by the sandbox and admitted by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub description: String,
    pub line: LineReference,
    pub rule: CodebaseRule,
    pub validation_reasoning: Option<String>,
    #[serde(default)]
    pub is_cached: bool,
}

/// A candidate violation the validator rejected, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedViolation {
    pub description: String,
    pub line: LineReference,
    pub rule_id: String,
    pub reasoning: String,
}

/// The outcome of reviewing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub violations: Vec<Violation>,
    pub explanation: String,
    pub rules: Vec<CodebaseRule>,
    /// Files read during the review, excluding the file under review,
    /// sorted and de-duplicated. Drives cache invalidation.
    pub visited_files: Vec<String>,
    pub rejected_violations: Option<Vec<RejectedViolation>>,
    pub cost: f64,
}

/// Canonical explanation tokens for short-circuited reviews (see §4.E).
pub const NO_PATCH_FOUND: &str = "NO_PATCH_FOUND";
pub const NO_APPLICABLE_RULES: &str = "NO_APPLICABLE_RULES";
pub const ROUND_LIMIT_EXCEEDED: &str = "ROUND_LIMIT_EXCEEDED";

impl FileAnalysis {
    pub fn empty(explanation: impl Into<String>, rules: Vec<CodebaseRule>) -> Self {
        Self {
            violations: Vec::new(),
            explanation: explanation.into(),
            rules,
            visited_files: Vec::new(),
            rejected_violations: None,
            cost: 0.0,
        }
    }

    /// Normalize `visited_files`: sort, de-duplicate, and strip `filename`
    /// (the file under review never counts as its own dependency).
    pub fn finalize_visited_files(&mut self, filename: &str) {
        self.visited_files.retain(|f| f != filename);
        self.visited_files.sort();
        self.visited_files.dedup();
    }
}

/// One row of the persisted review cache (see wisp-adapters::cache for the
/// on-disk representation). Kept here as a pure value type so both the
/// orchestrator and the adapter can reason about it without I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub filename: String,
    pub file_sha: String,
    pub rule_ids: Vec<String>,
    pub violations: Vec<Violation>,
    pub visited_files: Vec<VisitedFileRecord>,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitedFileRecord {
    pub filename: String,
    pub freshness_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_h2_heading_and_glyphs() {
        let raw = "\n## Naming\n\u{2705} Use snake_case for functions.";
        assert_eq!(normalize_rule_body(raw), "Use snake_case for functions.");
    }

    #[test]
    fn leaves_h4_heading_intact() {
        let raw = "#### Not a stripped heading\nBody text.";
        assert_eq!(
            normalize_rule_body(raw),
            "#### Not a stripped heading\nBody text."
        );
    }

    #[test]
    fn rule_ids_collide_iff_directory_and_name_match() {
        let a = CodebaseRule::make_id(Some("src"), "naming");
        let b = CodebaseRule::make_id(Some("src"), "naming");
        let c = CodebaseRule::make_id(Some("lib"), "naming");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn line_reference_rejects_zero_start_and_inverted_range() {
        assert!(LineReference::new(0, 1, Side::Right).is_err());
        assert!(LineReference::new(5, 4, Side::Right).is_err());
        assert!(LineReference::new(3, 3, Side::Left).is_ok());
    }

    #[test]
    fn file_change_sha_is_derived_from_patch_text() {
        let a = FileChange::new("f.rs", ChangeStatus::Modified, Some("patch-a".into()), 1, 0);
        let b = FileChange::new("f.rs", ChangeStatus::Modified, Some("patch-b".into()), 1, 0);
        assert_ne!(a.sha, b.sha);
    }
}
