//! The sandboxed tool surface exposed to the LLM: `read_file`, `list_dir`,
//! `grep_search`, `glob_search`, and the `complaint` violation sink.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use wisp_core::{is_line_reference_valid_for_patch, CodebaseRule, LineReference};

use crate::error::ToolError;
use crate::process::run_command_with_timeout;
use crate::sandbox;

const GREP_TIMEOUT: Duration = Duration::from_secs(30);
const GREP_MAX_MATCHES: usize = 50;

/// Directories `glob_search` never descends into.
const GLOB_PRUNED_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", "build", ".cache"];

pub struct ReadFileArgs {
    pub target_file: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub read_entire: bool,
}

pub struct ReadFileResult {
    pub content: String,
}

/// `read_file`: full contents on `read_entire`, otherwise the inclusive
/// `[start, end]` range with `[Lines a-b omitted]` placeholders either side.
pub fn read_file(root: &Path, args: ReadFileArgs) -> Result<ReadFileResult, ToolError> {
    let resolved = sandbox::resolve(root, Path::new(&args.target_file))?;
    if !resolved.absolute.is_file() {
        return Err(ToolError::NotFound(args.target_file));
    }
    let content =
        std::fs::read_to_string(&resolved.absolute).map_err(|_| ToolError::NotFound(args.target_file.clone()))?;

    if args.read_entire {
        return Ok(ReadFileResult { content });
    }

    let (Some(start), Some(end)) = (args.start, args.end) else {
        return Err(ToolError::InvalidLineRange {
            start: args.start.unwrap_or(0),
            end: args.end.unwrap_or(0),
        });
    };
    if start < 1 || end < start {
        return Err(ToolError::InvalidLineRange { start, end });
    }

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len() as i64;
    let start_idx = (start - 1).max(0) as usize;
    let end_idx = end.min(total) as usize;

    let mut out = String::new();
    if start > 1 {
        out.push_str(&format!("[Lines 1-{} omitted]\n", start - 1));
    }
    if start_idx < lines.len() {
        out.push_str(&lines[start_idx..end_idx.min(lines.len())].join("\n"));
        out.push('\n');
    }
    if end < total {
        out.push_str(&format!("[Lines {}-{} omitted]\n", end + 1, total));
    }

    Ok(ReadFileResult { content: out })
}

pub struct ListDirResult {
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub path: String,
}

/// `list_dir`: one shallow listing, unreadable entries silently skipped.
pub fn list_dir(root: &Path, relative_workspace_path: &str) -> Result<ListDirResult, ToolError> {
    let resolved = sandbox::resolve(root, Path::new(relative_workspace_path))?;
    if !resolved.absolute.is_dir() {
        return Err(ToolError::NotADirectory(relative_workspace_path.to_string()));
    }

    let mut files = Vec::new();
    let mut directories = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&resolved.absolute) {
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                directories.push(name);
            } else if file_type.is_file() {
                files.push(name);
            }
        }
    }
    files.sort();
    directories.sort();

    Ok(ListDirResult {
        files,
        directories,
        path: resolved.relative.to_string_lossy().to_string(),
    })
}

pub struct GrepSearchArgs {
    pub query: String,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub case_sensitive: Option<bool>,
}

pub struct GrepMatch {
    pub file: String,
    pub line_number: u32,
    pub content: String,
}

/// `grep_search`: an argv-invoked ripgrep, never a shell string. Exit code 1
/// with empty stderr means "no matches", not failure.
pub fn grep_search(
    root: &Path,
    ripgrep_binary: &str,
    args: GrepSearchArgs,
) -> Result<Vec<GrepMatch>, ToolError> {
    let mut cmd = Command::new(ripgrep_binary);
    cmd.current_dir(root);
    cmd.arg("--no-config")
        .arg("--line-number")
        .arg("--color=never")
        .arg("--max-columns=300")
        .arg("--max-filesize=1M")
        .arg("--max-count=50");

    if !args.case_sensitive.unwrap_or(true) {
        cmd.arg("-i");
    }
    if let Some(pattern) = args.include_pattern.as_deref().filter(|p| !p.is_empty()) {
        cmd.arg("-g").arg(pattern);
    }
    if let Some(pattern) = args.exclude_pattern.as_deref().filter(|p| !p.is_empty()) {
        cmd.arg("-g").arg(format!("!{pattern}"));
    }
    cmd.arg(&args.query);

    let result = run_command_with_timeout(&mut cmd, GREP_TIMEOUT).map_err(|source| {
        ToolError::SpawnFailed {
            binary: ripgrep_binary.to_string(),
            source,
        }
    })?;

    if result.timed_out {
        return Err(ToolError::Timeout { secs: GREP_TIMEOUT.as_secs() });
    }

    let code = result.status.and_then(|s| s.code()).unwrap_or(-1);
    if code == 1 && result.stderr.trim().is_empty() {
        return Ok(Vec::new());
    }
    if code != 0 {
        return Err(ToolError::SearchFailed {
            code,
            stderr: result.stderr,
        });
    }

    let mut matches = Vec::new();
    for line in result.stdout.lines().take(GREP_MAX_MATCHES) {
        let mut parts = line.splitn(3, ':');
        let (Some(file), Some(line_number), Some(content)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(line_number) = line_number.parse::<u32>() else {
            continue;
        };
        matches.push(GrepMatch {
            file: file.to_string(),
            line_number,
            content: content.to_string(),
        });
    }

    Ok(matches)
}

/// `glob_search`: walk `path` (default workspace root) collecting files
/// matching `pattern`, newest modification time first.
pub fn glob_search(
    root: &Path,
    pattern: &str,
    path: Option<&str>,
) -> Result<Vec<String>, ToolError> {
    let search_root = match path {
        Some(p) if !p.is_empty() => sandbox::resolve(root, Path::new(p))?.absolute,
        _ => root.to_path_buf(),
    };

    let glob = wisp_core::glob::Glob::compile(pattern)
        .map_err(|e| ToolError::ComplaintRejected(e.to_string()))?;

    let mut hits: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in walkdir::WalkDir::new(&search_root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !GLOB_PRUNED_DIRS.contains(&e.file_name().to_string_lossy().as_ref())
        })
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !glob.is_match(&relative) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        hits.push((entry.path().to_path_buf(), modified));
    }

    hits.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(hits
        .into_iter()
        .map(|(p, _)| {
            p.strip_prefix(root)
                .unwrap_or(&p)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect())
}

pub struct ComplaintArgs {
    pub file_path: String,
    pub line: LineReference,
    pub description: String,
    pub rule_id: String,
}

pub struct ComplaintAccepted {
    pub file_path: String,
    pub line: LineReference,
    pub description: String,
    pub rule_id: String,
}

/// `complaint`: the one tool that is not an inspection — it sinks a
/// candidate violation. Rejects anything that can't possibly be valid so
/// the model can retry with corrected parameters.
pub fn complaint(
    file_under_review: &str,
    patch: Option<&str>,
    applicable_rules: &[CodebaseRule],
    args: ComplaintArgs,
) -> Result<ComplaintAccepted, ToolError> {
    if args.file_path != file_under_review {
        return Err(ToolError::ComplaintRejected(format!(
            "file_path {:?} does not match the file under review ({:?})",
            args.file_path, file_under_review
        )));
    }
    if !applicable_rules.iter().any(|r| r.id == args.rule_id) {
        return Err(ToolError::ComplaintRejected(format!(
            "rule_id {:?} is not in the applicable rule set for this file",
            args.rule_id
        )));
    }
    let Some(patch) = patch else {
        return Err(ToolError::ComplaintRejected(
            "file under review has no patch".to_string(),
        ));
    };
    if !is_line_reference_valid_for_patch(&args.line, patch) {
        return Err(ToolError::ComplaintRejected(format!(
            "line reference {}-{} is not valid for this file's patch",
            args.line.start, args.line.end
        )));
    }

    Ok(ComplaintAccepted {
        file_path: args.file_path,
        line: args.line,
        description: args.description,
        rule_id: args.rule_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_core::Side;

    fn rule(id: &str) -> CodebaseRule {
        let mut r = CodebaseRule::new("r", "body", None, vec![]);
        r.id = id.to_string();
        r
    }

    #[test]
    fn read_file_entire_returns_full_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let result = read_file(
            dir.path(),
            ReadFileArgs {
                target_file: "a.txt".to_string(),
                start: None,
                end: None,
                read_entire: true,
            },
        )
        .unwrap();
        assert_eq!(result.content, "one\ntwo\nthree\n");
    }

    #[test]
    fn read_file_range_omits_outside_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let result = read_file(
            dir.path(),
            ReadFileArgs {
                target_file: "a.txt".to_string(),
                start: Some(2),
                end: Some(2),
                read_entire: false,
            },
        )
        .unwrap();
        assert!(result.content.contains("[Lines 1-1 omitted]"));
        assert!(result.content.contains("two"));
        assert!(result.content.contains("[Lines 3-4 omitted]"));
    }

    #[test]
    fn read_file_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(
            dir.path(),
            ReadFileArgs {
                target_file: "missing.txt".to_string(),
                start: None,
                end: None,
                read_entire: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn complaint_rejects_wrong_file() {
        let patch = "@@ -1,1 +1,1 @@\n-old\n+new\n";
        let line = LineReference::new(1, 1, Side::Right).unwrap();
        let err = complaint(
            "src/a.rs",
            Some(patch),
            &[rule("rule-1")],
            ComplaintArgs {
                file_path: "src/b.rs".to_string(),
                line,
                description: "x".to_string(),
                rule_id: "rule-1".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::ComplaintRejected(_)));
    }

    #[test]
    fn complaint_rejects_unknown_rule_id() {
        let patch = "@@ -1,1 +1,1 @@\n-old\n+new\n";
        let line = LineReference::new(1, 1, Side::Right).unwrap();
        let err = complaint(
            "src/a.rs",
            Some(patch),
            &[rule("rule-1")],
            ComplaintArgs {
                file_path: "src/a.rs".to_string(),
                line,
                description: "x".to_string(),
                rule_id: "rule-unknown".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::ComplaintRejected(_)));
    }

    #[test]
    fn complaint_accepts_a_valid_candidate() {
        let patch = "@@ -1,1 +1,1 @@\n-old\n+new\n";
        let line = LineReference::new(1, 1, Side::Right).unwrap();
        let accepted = complaint(
            "src/a.rs",
            Some(patch),
            &[rule("rule-1")],
            ComplaintArgs {
                file_path: "src/a.rs".to_string(),
                line,
                description: "x".to_string(),
                rule_id: "rule-1".to_string(),
            },
        )
        .unwrap();
        assert_eq!(accepted.file_path, "src/a.rs");
    }
}
