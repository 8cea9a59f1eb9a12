//! Synchronous core: diff parsing, line-reference validation, and rule
//! matching. Nothing in this crate suspends — no tokio, no network, no
//! blocking I/O beyond the plain filesystem reads rule discovery needs.

pub mod error;
pub mod glob;
pub mod model;
pub mod patch;
pub mod rules;

pub use error::{PatchError, RuleError};
pub use model::{
    CacheEntry, ChangeStatus, CodebaseRule, FileAnalysis, FileChange, LineReference,
    RejectedViolation, Side, Violation, VisitedFileRecord, NO_APPLICABLE_RULES, NO_PATCH_FOUND,
    ROUND_LIMIT_EXCEEDED,
};
pub use patch::{
    add_line_numbers_to_patch, changed_lines, extract_diff_hunk, filter_diff,
    is_line_reference_valid_for_patch, hunk_ranges, parse_patch, FilterMode, PatchLine,
};
pub use rules::{discover_rules, matches_include, rules_for_file};
