//! Adapters that touch the outside world: config, credentials, the sandboxed
//! filesystem/tool surface, the on-disk review cache, and the git-backed
//! change source.

pub mod cache;
pub mod change_source;
pub mod config;
pub mod error;
pub mod freshness;
pub mod keyring;
pub mod process;
pub mod sandbox;
pub mod tools;

pub use cache::ReviewCache;
pub use change_source::{collect_changes, ChangeSet};
pub use config::{Config, ConfigOverrides};
pub use error::{CacheError, ChangeSourceError, ToolError};
pub use freshness::freshness_token;
pub use sandbox::{resolve as resolve_sandboxed_path, SandboxedPath};
