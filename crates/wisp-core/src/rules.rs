//! Rule loading and directory-scoped include/exclude matching.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::RuleError;
use crate::glob::{split_include_list, Glob};
use crate::model::CodebaseRule;

/// Directories never descended into while discovering `.wispbit/rules`.
const PRUNED_DIR_NAMES: &[&str] = &[
    "node_modules",
    "target",
    "vendor",
    ".venv",
    "venv",
    "dist",
    "build",
];

fn is_pruned(name: &str) -> bool {
    (name.starts_with('.') && name != ".wispbit") || PRUNED_DIR_NAMES.contains(&name)
}

/// Recursively discover every `.wispbit/rules` subtree under `root` and load
/// its `.md` files. Hidden directories (other than `.wispbit` itself) and
/// known dependency directories are pruned from the walk.
pub fn discover_rules(root: &Path) -> Result<Vec<CodebaseRule>, RuleError> {
    let mut rules = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !is_pruned(&name)
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name() != "rules" {
            continue;
        }
        let parent = entry.path().parent();
        if parent.and_then(|p| p.file_name()) != Some(std::ffi::OsStr::new(".wispbit")) {
            continue;
        }
        let wispbit_dir = parent.unwrap();
        let owning_dir = wispbit_dir.parent().unwrap_or(root);
        let directory = relative_to(root, owning_dir);

        for file_entry in WalkDir::new(entry.path())
            .into_iter()
            .filter_map(Result::ok)
        {
            if !file_entry.file_type().is_file() {
                continue;
            }
            if file_entry.path().extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            rules.push(load_rule_file(file_entry.path(), directory.clone())?);
        }
    }

    Ok(rules)
}

fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel.to_string_lossy().replace('\\', "/"))
    }
}

fn load_rule_file(path: &Path, directory: Option<String>) -> Result<CodebaseRule, RuleError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let (include, body) = parse_frontmatter(&raw).map_err(|reason| RuleError::MalformedFrontmatter {
        path: path.display().to_string(),
        reason,
    })?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    Ok(CodebaseRule::new(name, body, directory, include))
}

/// Parse an optional leading `---`...`---` YAML-like frontmatter block,
/// reading only the `include` key. Returns `(include_patterns, body)`.
fn parse_frontmatter(raw: &str) -> Result<(Vec<String>, &str), String> {
    let trimmed_start = raw.trim_start_matches(['\u{feff}']);
    if !trimmed_start.trim_start().starts_with("---") {
        return Ok((Vec::new(), raw));
    }

    let after_open = trimmed_start
        .trim_start()
        .strip_prefix("---")
        .ok_or("missing opening frontmatter fence")?;
    let Some(close_idx) = after_open.find("\n---") else {
        return Err("unterminated frontmatter block".to_string());
    };

    let frontmatter = &after_open[..close_idx];
    let after_close = &after_open[close_idx + 4..];
    let body_start = after_close.find('\n').map(|i| i + 1).unwrap_or(after_close.len());
    let body = &after_close[body_start..];

    let mut include = Vec::new();
    for line in frontmatter.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() == "include" {
            include = split_include_list(value.trim());
        }
    }

    Ok((include, body))
}

/// Implements `matchesInclude` from the rule engine: directory-rebasing,
/// positive/negative split, and glob matching.
pub fn matches_include(rule: &CodebaseRule, filepath: &str) -> bool {
    let filepath = filepath.replace('\\', "/");

    let rebased: Vec<String> = rule
        .include
        .iter()
        .map(|pattern| rebase_pattern(pattern, rule.directory.as_deref()))
        .collect();

    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    for pattern in &rebased {
        if let Some(stripped) = pattern.strip_prefix('!') {
            negatives.push(stripped.to_string());
        } else {
            positives.push(pattern.clone());
        }
    }

    let included = if positives.is_empty() {
        true
    } else {
        positives.iter().any(|p| glob_matches(p, &filepath))
    };

    if !included {
        return false;
    }

    !negatives.iter().any(|p| glob_matches(p, &filepath))
}

fn glob_matches(pattern: &str, filepath: &str) -> bool {
    Glob::compile(pattern)
        .map(|g| g.is_match(filepath))
        .unwrap_or(false)
}

fn rebase_pattern(pattern: &str, directory: Option<&str>) -> String {
    let Some(dir) = directory.filter(|d| !d.is_empty() && *d != ".") else {
        return pattern.to_string();
    };

    let (negated, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    let already_scoped = body.starts_with('/') || body.starts_with(&format!("{dir}/"));
    let rebased = if already_scoped {
        body.to_string()
    } else {
        format!("{dir}/{body}")
    };

    if negated {
        format!("!{rebased}")
    } else {
        rebased
    }
}

/// Filter `rules` down to those whose include/exclude patterns admit
/// `filepath`.
pub fn rules_for_file<'a>(rules: &'a [CodebaseRule], filepath: &str) -> Vec<&'a CodebaseRule> {
    rules
        .iter()
        .filter(|rule| matches_include(rule, filepath))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(directory: Option<&str>, include: &[&str]) -> CodebaseRule {
        CodebaseRule::new(
            "naming",
            "Body text.",
            directory.map(String::from),
            include.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn directory_scoped_rule_matches_only_its_subtree() {
        let r = rule(Some("src"), &["**/*.js", "!**/*.test.js"]);
        assert!(matches_include(&r, "src/a/b.js"));
        assert!(!matches_include(&r, "src/a/b.test.js"));
        assert!(!matches_include(&r, "lib/a.js"));
    }

    #[test]
    fn empty_positive_list_includes_everything_not_excluded() {
        let r = rule(None, &["!**/*.test.js"]);
        assert!(matches_include(&r, "src/a.js"));
        assert!(!matches_include(&r, "src/a.test.js"));
    }

    #[test]
    fn matching_is_case_insensitive_end_to_end() {
        let r = rule(None, &["**/*.JS"]);
        assert!(matches_include(&r, "src/A.js"));
    }

    #[test]
    fn frontmatter_include_is_parsed_and_quote_stripped() {
        let raw = "---\ninclude: **/*.js, \"a, b.md\"\n---\nBody.";
        let (include, body) = parse_frontmatter(raw).unwrap();
        assert_eq!(include, vec!["**/*.js".to_string(), "a, b.md".to_string()]);
        assert_eq!(body.trim(), "Body.");
    }

    #[test]
    fn missing_frontmatter_yields_whole_file_as_body() {
        let raw = "No frontmatter here.";
        let (include, body) = parse_frontmatter(raw).unwrap();
        assert!(include.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn unterminated_frontmatter_is_an_error() {
        let raw = "---\ninclude: **/*.js\nBody without closing fence";
        assert!(parse_frontmatter(raw).is_err());
    }
}
