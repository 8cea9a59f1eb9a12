use thiserror::Error;

/// Errors raised while parsing or addressing a unified diff.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch has no hunks")]
    NoHunks,
    #[error("hunk header is malformed: {0}")]
    MalformedHeader(String),
    #[error("line reference {start}-{end} ({side:?}) is not valid for this patch")]
    InvalidLineReference {
        start: u32,
        end: u32,
        side: crate::model::Side,
    },
}

/// Errors raised while loading or matching codebase rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rule frontmatter in {path} is malformed: {reason}")]
    MalformedFrontmatter { path: String, reason: String },
    #[error("glob pattern {pattern:?} is invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
