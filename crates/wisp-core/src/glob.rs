//! Glob-to-regex translation used by the rule engine.
//!
//! Supports `**` (any depth, including zero), `{a,b,c}` brace expansion,
//! case-insensitive matching, dotfile matching, and base-name matching. A
//! bare `*` (no `**` anywhere in the pattern) is upgraded to also cross
//! directory separators, since most hand-written rule patterns are written
//! against that looser mental model.

use regex::Regex;

use crate::error::RuleError;

/// A compiled glob pattern plus an optional base-name fallback regex. The
/// fallback only exists for patterns with no `/` of their own — matching
/// minimatch's `matchBase` semantics, a slash-bearing pattern like
/// `src/**/*.js` must match the full path, never just a file's base name.
pub struct Glob {
    full_path: Regex,
    base_name: Option<Regex>,
}

impl Glob {
    pub fn compile(pattern: &str) -> Result<Self, RuleError> {
        let has_double_star = pattern.contains("**");
        let variants = expand_braces(pattern);

        let mut full_alts = Vec::with_capacity(variants.len());
        for variant in &variants {
            full_alts.push(translate(variant, has_double_star));
        }

        let full_regex_src = format!("(?i)^(?:{})$", full_alts.join("|"));
        let full_path = Regex::new(&full_regex_src).map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let base_name = if pattern.contains('/') {
            None
        } else {
            let mut base_alts = Vec::with_capacity(variants.len());
            for variant in &variants {
                base_alts.push(translate(variant, has_double_star));
            }
            let base_regex_src = format!("(?i)^(?:{})$", base_alts.join("|"));
            Some(
                Regex::new(&base_regex_src).map_err(|e| RuleError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?,
            )
        };

        Ok(Self {
            full_path,
            base_name,
        })
    }

    /// Match either the full (forward-slash-normalized) path, or — only for
    /// patterns with no `/` of their own — just its base name.
    pub fn is_match(&self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        if self.full_path.is_match(&normalized) {
            return true;
        }
        let Some(base_name) = &self.base_name else {
            return false;
        };
        let base = normalized.rsplit('/').next().unwrap_or(&normalized);
        base_name.is_match(base)
    }
}

/// Expand `{a,b,c}` groups into a flat list of concrete patterns. Only one
/// brace group is common in practice; we handle arbitrarily many via
/// recursive expansion of the first group found.
fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(open) = pattern.find('{') {
        if let Some(close) = find_matching_brace(pattern, open) {
            let prefix = &pattern[..open];
            let inner = &pattern[open + 1..close];
            let suffix = &pattern[close + 1..];
            let mut results = Vec::new();
            for option in split_top_level_commas(inner) {
                let candidate = format!("{prefix}{option}{suffix}");
                results.extend(expand_braces(&candidate));
            }
            return results;
        }
    }
    vec![pattern.to_string()]
}

fn find_matching_brace(s: &str, open_idx: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in s.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

/// Translate one brace-free glob into a regex body (no anchors, no
/// case-insensitivity flag — the caller wraps those).
fn translate(pattern: &str, has_double_star: bool) -> String {
    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    // "**": any sequence of characters, including separators.
                    out.push_str(".*");
                    i += 2;
                    // Swallow an immediately following "/" so "**/x" also
                    // matches "x" at the root.
                    if i < chars.len() && chars[i] == '/' {
                        i += 1;
                    }
                } else if has_double_star {
                    // A lone "*" in a pattern that uses "**" elsewhere stays
                    // scoped to one path segment.
                    out.push_str("[^/]*");
                    i += 1;
                } else {
                    // Bare "*" with no "**" anywhere: upgraded to cross
                    // directory separators.
                    out.push_str(".*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c if "\\.+^$()|[]".contains(c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Strip surrounding matching quotes (`"..."` or `'...'`) from one pattern
/// token, and trim whitespace.
pub fn strip_quotes_and_trim(token: &str) -> String {
    let trimmed = token.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Split a comma-separated pattern list, ignoring commas nested inside
/// `{...}` brace groups or `"..."`/`'...'` quoted segments.
pub fn split_include_list(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut brace_depth = 0i32;
    let mut quote: Option<char> = None;

    for ch in value.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '{' => {
                    brace_depth += 1;
                    current.push(ch);
                }
                '}' => {
                    brace_depth -= 1;
                    current.push(ch);
                }
                ',' if brace_depth == 0 => {
                    parts.push(strip_quotes_and_trim(&current));
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(strip_quotes_and_trim(&current));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_matches_any_depth() {
        let g = Glob::compile("src/**/*.js").unwrap();
        assert!(g.is_match("src/a/b/c.js"));
        assert!(g.is_match("src/c.js"));
        assert!(!g.is_match("lib/c.js"));
    }

    #[test]
    fn slash_bearing_pattern_never_falls_back_to_base_name() {
        let g = Glob::compile("src/**/*.js").unwrap();
        assert!(!g.is_match("lib/a.js"));
        assert!(!g.is_match("a.js"));
    }

    #[test]
    fn bare_star_without_double_star_crosses_separators() {
        let g = Glob::compile("*.test.js").unwrap();
        assert!(g.is_match("a/b/foo.test.js"));
    }

    #[test]
    fn brace_expansion_matches_any_alternative() {
        let g = Glob::compile("**/*.{js,ts}").unwrap();
        assert!(g.is_match("src/a.js"));
        assert!(g.is_match("src/a.ts"));
        assert!(!g.is_match("src/a.py"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let g = Glob::compile("**/*.JS").unwrap();
        assert!(g.is_match("src/a.js"));
    }

    #[test]
    fn base_name_match_is_allowed() {
        let g = Glob::compile("README.md").unwrap();
        assert!(g.is_match("docs/README.md"));
    }

    #[test]
    fn split_include_list_ignores_commas_in_braces_and_quotes() {
        let parts = split_include_list(r#"**/*.{js,ts}, "a, b.md", 'c, d.md'"#);
        assert_eq!(parts, vec!["**/*.{js,ts}", "a, b.md", "c, d.md"]);
    }

    #[test]
    fn strip_quotes_removes_matching_pair_only() {
        assert_eq!(strip_quotes_and_trim("  \"a.js\"  "), "a.js");
        assert_eq!(strip_quotes_and_trim("'a.js'"), "a.js");
        assert_eq!(strip_quotes_and_trim("a.js"), "a.js");
    }
}
