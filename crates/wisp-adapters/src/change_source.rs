//! Produces the set of changed files for one review request by diffing a
//! workspace against an optional base revision using libgit2.

use std::path::Path;

use git2::{Delta, DiffOptions, Repository};
use wisp_core::{ChangeStatus, FileChange};

use crate::error::ChangeSourceError;

pub struct ChangeSet {
    pub files: Vec<FileChange>,
    pub current_branch: String,
    pub current_commit: String,
    pub diff_branch: Option<String>,
    pub diff_commit: Option<String>,
}

fn open_repo(workspace_root: &Path) -> Result<Repository, ChangeSourceError> {
    Repository::discover(workspace_root).map_err(|source| ChangeSourceError::OpenRepo {
        path: workspace_root.display().to_string(),
        source,
    })
}

/// Produce `(files, currentBranch, currentCommit, diffBranch, diffCommit)`
/// for `workspace_root`, comparing against `base_revision` (defaulting to
/// HEAD) and the working tree.
pub fn collect_changes(
    workspace_root: &Path,
    base_revision: Option<&str>,
) -> Result<ChangeSet, ChangeSourceError> {
    let repo = open_repo(workspace_root)?;

    let head = repo.head().ok();
    let current_branch = head
        .as_ref()
        .and_then(|h| h.shorthand())
        .unwrap_or("HEAD")
        .to_string();
    let current_commit = head
        .as_ref()
        .and_then(|h| h.target())
        .map(|oid| oid.to_string())
        .unwrap_or_default();

    let base_revision = base_revision.unwrap_or("HEAD");
    let base_object = repo
        .revparse_single(base_revision)
        .map_err(|source| ChangeSourceError::ResolveRevision {
            revision: base_revision.to_string(),
            source,
        })?;
    let base_commit = base_object.peel_to_commit()?;
    let base_tree = base_commit.tree()?;

    let mut diff_opts = DiffOptions::new();
    diff_opts.include_untracked(true).recurse_untracked_dirs(true);

    let diff = repo.diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut diff_opts))?;

    let mut files = Vec::new();
    for delta_idx in 0..diff.deltas().len() {
        let delta = diff.get_delta(delta_idx).expect("delta index in range");
        let status = map_status(delta.status());
        let filename = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let patch = git2::Patch::from_diff(&diff, delta_idx)?
            .map(|mut patch| render_patch_text(&mut patch))
            .transpose()?
            .flatten();

        let (additions, deletions) = count_changes(&patch);

        files.push(FileChange::new(filename, status, patch, additions, deletions));
    }

    // Deleted files: materialize their last-known content at the base
    // revision as a fully-`-`-prefixed pseudo-patch so downstream analyzers
    // see them as changes even though the working tree no longer has them.
    for file in files.iter_mut() {
        if file.status == ChangeStatus::Removed && file.patch.is_none() {
            if let Ok(content) = read_blob_at(&repo, &base_tree, &file.filename) {
                file.patch = Some(materialize_deletion_patch(&content));
                let (additions, deletions) = count_changes(&file.patch);
                file.additions = additions;
                file.deletions = deletions;
            }
        }
    }

    Ok(ChangeSet {
        files,
        current_branch,
        current_commit,
        diff_branch: Some(base_revision.to_string()),
        diff_commit: Some(base_commit.id().to_string()),
    })
}

fn map_status(delta: Delta) -> ChangeStatus {
    match delta {
        Delta::Added => ChangeStatus::Added,
        Delta::Deleted => ChangeStatus::Removed,
        Delta::Modified => ChangeStatus::Modified,
        Delta::Renamed => ChangeStatus::Renamed,
        Delta::Copied => ChangeStatus::Copied,
        Delta::Unmodified => ChangeStatus::Unchanged,
        _ => ChangeStatus::Changed,
    }
}

fn render_patch_text(patch: &mut git2::Patch<'_>) -> Result<Option<String>, ChangeSourceError> {
    let buf = patch.to_buf()?;
    let text = buf.as_str().map(|s| s.to_string());
    Ok(text)
}

fn count_changes(patch: &Option<String>) -> (u32, u32) {
    let Some(patch) = patch else {
        return (0, 0);
    };
    let (added, removed) = wisp_core::changed_lines(patch);
    (added.len() as u32, removed.len() as u32)
}

fn read_blob_at(repo: &Repository, tree: &git2::Tree, filename: &str) -> Result<String, ChangeSourceError> {
    let entry = tree.get_path(Path::new(filename))?;
    let object = entry.to_object(repo)?;
    let blob = object.peel_to_blob()?;
    Ok(String::from_utf8_lossy(blob.content()).to_string())
}

fn materialize_deletion_patch(content: &str) -> String {
    let line_count = content.lines().count().max(1) as u32;
    let mut body = String::new();
    for line in content.lines() {
        body.push_str(&format!("-{line}\n"));
    }
    format!("@@ -1,{line_count} +0,0 @@\n{body}")
}
