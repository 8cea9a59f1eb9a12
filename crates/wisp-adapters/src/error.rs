use thiserror::Error;

/// Errors raised by the sandboxed tool executor.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path {0:?} escapes the workspace root")]
    PathEscapesRoot(String),
    #[error("file not found: {0:?}")]
    NotFound(String),
    #[error("{0:?} is not a directory")]
    NotADirectory(String),
    #[error("invalid line range {start}-{end}")]
    InvalidLineRange { start: i64, end: i64 },
    #[error("ripgrep binary {binary:?} could not be started: {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ripgrep search timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("ripgrep exited with status {code}: {stderr}")]
    SearchFailed { code: i32, stderr: String },
    #[error("complaint rejected: {0}")]
    ComplaintRejected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the review cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache at {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write cache at {path:?}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while producing a change set from a repository.
#[derive(Debug, Error)]
pub enum ChangeSourceError {
    #[error("failed to open repository at {path:?}: {source}")]
    OpenRepo {
        path: String,
        #[source]
        source: git2::Error,
    },
    #[error("failed to resolve revision {revision:?}: {source}")]
    ResolveRevision {
        revision: String,
        #[source]
        source: git2::Error,
    },
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}
