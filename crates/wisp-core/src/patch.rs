//! Unified diff parsing and line-reference validation.
//!
//! Everything here is synchronous and allocation-light; the review loop
//! calls into this module on every round, so it stays off the async path.

use std::collections::BTreeSet;

use crate::error::PatchError;
use crate::model::{LineReference, Side};

/// One logical line out of a hunk body, tagged with its old/new line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLine {
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkHeader {
    old_start: u32,
    old_count: u32,
    new_start: u32,
    new_count: u32,
}

fn parse_hunk_header(line: &str) -> Result<HunkHeader, PatchError> {
    let body = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(|| PatchError::MalformedHeader(line.to_string()))?;

    let mut parts = body.split_whitespace();
    let old = parts
        .next()
        .ok_or_else(|| PatchError::MalformedHeader(line.to_string()))?;
    let new = parts
        .next()
        .ok_or_else(|| PatchError::MalformedHeader(line.to_string()))?;

    let (old_start, old_count) = parse_span(old, '-')?;
    let (new_start, new_count) = parse_span(new, '+')?;

    Ok(HunkHeader {
        old_start,
        old_count,
        new_start,
        new_count,
    })
}

fn parse_span(token: &str, prefix: char) -> Result<(u32, u32), PatchError> {
    let stripped = token
        .strip_prefix(prefix)
        .ok_or_else(|| PatchError::MalformedHeader(token.to_string()))?;
    let mut pieces = stripped.splitn(2, ',');
    let start: u32 = pieces
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PatchError::MalformedHeader(token.to_string()))?;
    let count: u32 = match pieces.next() {
        Some(c) => c
            .parse()
            .map_err(|_| PatchError::MalformedHeader(token.to_string()))?,
        None => 1,
    };
    Ok((start, count))
}

/// Walk a unified diff yielding `(old_line, new_line, content)` for every
/// body line across every hunk. Lines before the first `@@` are ignored.
/// `parse_patch("")` returns an empty sequence.
pub fn parse_patch(patch: &str) -> Vec<PatchLine> {
    let mut out = Vec::new();
    let mut old_cursor = 0u32;
    let mut new_cursor = 0u32;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@ ") {
            if let Ok(header) = parse_hunk_header(line) {
                old_cursor = header.old_start;
                new_cursor = header.new_start;
                in_hunk = true;
            }
            continue;
        }
        if !in_hunk {
            continue;
        }
        if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }
        if let Some(content) = line.strip_prefix('+') {
            out.push(PatchLine {
                old_line: None,
                new_line: Some(new_cursor),
                content: content.to_string(),
            });
            new_cursor += 1;
        } else if let Some(content) = line.strip_prefix('-') {
            out.push(PatchLine {
                old_line: Some(old_cursor),
                new_line: None,
                content: content.to_string(),
            });
            old_cursor += 1;
        } else {
            let content = line.strip_prefix(' ').unwrap_or(line);
            out.push(PatchLine {
                old_line: Some(old_cursor),
                new_line: Some(new_cursor),
                content: content.to_string(),
            });
            old_cursor += 1;
            new_cursor += 1;
        }
    }

    out
}

/// `(added_new_lines, removed_old_lines)`.
pub fn changed_lines(patch: &str) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let mut added = BTreeSet::new();
    let mut removed = BTreeSet::new();
    for line in parse_patch(patch) {
        match (line.old_line, line.new_line) {
            (None, Some(n)) => {
                added.insert(n);
            }
            (Some(o), None) => {
                removed.insert(o);
            }
            _ => {}
        }
    }
    (added, removed)
}

/// Per-hunk `[start, end]` inclusive ranges: `(old_ranges, new_ranges)`.
/// A missing count in the header defaults to 1 per the unified-diff
/// convention, so a single-line span is `[start, start]`.
pub fn hunk_ranges(patch: &str) -> (Vec<(u32, u32)>, Vec<(u32, u32)>) {
    let mut old_ranges = Vec::new();
    let mut new_ranges = Vec::new();
    for line in patch.lines() {
        if line.starts_with("@@ ") {
            if let Ok(header) = parse_hunk_header(line) {
                let old_end = if header.old_count == 0 {
                    header.old_start
                } else {
                    header.old_start + header.old_count - 1
                };
                let new_end = if header.new_count == 0 {
                    header.new_start
                } else {
                    header.new_start + header.new_count - 1
                };
                old_ranges.push((header.old_start, old_end));
                new_ranges.push((header.new_start, new_end));
            }
        }
    }
    (old_ranges, new_ranges)
}

/// True iff `reference` is fully contained in at least one hunk range on its
/// side AND at least one line in the range is an actually-changed line on
/// that side. References touching only context lines are rejected.
pub fn is_line_reference_valid_for_patch(reference: &LineReference, patch: &str) -> bool {
    if patch.trim().is_empty() {
        return false;
    }
    let (old_ranges, new_ranges) = hunk_ranges(patch);
    let (added, removed) = changed_lines(patch);

    let (ranges, changed) = match reference.side {
        Side::Right => (&new_ranges, &added),
        Side::Left => (&old_ranges, &removed),
    };

    let contained = ranges
        .iter()
        .any(|(start, end)| reference.start >= *start && reference.end <= *end);
    if !contained {
        return false;
    }

    (reference.start..=reference.end).any(|l| changed.contains(&l))
}

fn format_span(start: u32, count: u32) -> String {
    if count == 1 {
        format!("{start}")
    } else {
        format!("{start},{count}")
    }
}

/// Locate the first hunk containing `[start, end]` on `side`, and rebuild a
/// minimal patch around it with `context` lines of padding on either side of
/// the changed lines actually kept. Returns `""` if no hunk contains the
/// range.
pub fn extract_diff_hunk(patch: &str, start: u32, end: u32, side: Side, context: u32) -> String {
    let hunks = split_hunks(patch);

    for hunk in &hunks {
        let lines = parse_patch(&hunk.text);
        let in_hunk = lines.iter().any(|l| {
            let n = match side {
                Side::Right => l.new_line,
                Side::Left => l.old_line,
            };
            matches!(n, Some(n) if n >= start && n <= end)
        });
        if !in_hunk {
            continue;
        }

        // Index of the target lines within this hunk's body.
        let target_idxs: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                let n = match side {
                    Side::Right => l.new_line,
                    Side::Left => l.old_line,
                };
                matches!(n, Some(n) if n >= start && n <= end)
            })
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = target_idxs.first() else {
            continue;
        };
        let &last = target_idxs.last().unwrap();

        let lo = first.saturating_sub(context as usize);
        let hi = (last + context as usize).min(lines.len().saturating_sub(1));

        let kept = &lines[lo..=hi];

        let mut old_start = None;
        let mut new_start = None;
        let mut old_count = 0u32;
        let mut new_count = 0u32;
        let mut body = String::new();

        for l in kept {
            match (l.old_line, l.new_line) {
                (Some(o), Some(n)) => {
                    old_start.get_or_insert(o);
                    new_start.get_or_insert(n);
                    old_count += 1;
                    new_count += 1;
                    body.push_str(&format!(" {}\n", l.content));
                }
                (Some(o), None) => {
                    old_start.get_or_insert(o);
                    old_count += 1;
                    body.push_str(&format!("-{}\n", l.content));
                }
                (None, Some(n)) => {
                    new_start.get_or_insert(n);
                    new_count += 1;
                    body.push_str(&format!("+{}\n", l.content));
                }
                (None, None) => {}
            }
        }

        let old_start = old_start.unwrap_or(0);
        let new_start = new_start.unwrap_or(0);
        let header = format!(
            "@@ -{} +{} @@",
            format_span(old_start, old_count),
            format_span(new_start, new_count)
        );

        return format!("{header}\n{body}");
    }

    String::new()
}

/// One contiguous hunk, header plus raw body text (header line included so
/// `parse_patch` can re-derive cursors from it alone).
struct RawHunk {
    text: String,
}

fn split_hunks(patch: &str) -> Vec<RawHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<String> = None;

    for line in patch.lines() {
        if line.starts_with("@@ ") {
            if let Some(text) = current.take() {
                hunks.push(RawHunk { text });
            }
            current = Some(format!("{line}\n"));
        } else if let Some(text) = current.as_mut() {
            text.push_str(line);
            text.push('\n');
        }
    }
    if let Some(text) = current {
        hunks.push(RawHunk { text });
    }
    hunks
}

/// Prepend each line with its file line numbers: deletions get `L<old>`,
/// additions get `    R<new>` (4-space indent), context lines get both
/// `L<old> R<new>`, and metadata/header lines pass through verbatim.
pub fn add_line_numbers_to_patch(patch: &str) -> String {
    let mut out = String::new();
    let mut old_cursor = 0u32;
    let mut new_cursor = 0u32;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@ ") {
            if let Ok(header) = parse_hunk_header(line) {
                old_cursor = header.old_start;
                new_cursor = header.new_start;
                in_hunk = true;
            }
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if !in_hunk || line.starts_with('\\') {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if let Some(content) = line.strip_prefix('+') {
            out.push_str(&format!("    R{new_cursor} +{content}\n"));
            new_cursor += 1;
        } else if let Some(content) = line.strip_prefix('-') {
            out.push_str(&format!("L{old_cursor} -{content}\n"));
            old_cursor += 1;
        } else {
            let content = line.strip_prefix(' ').unwrap_or(line);
            out.push_str(&format!("L{old_cursor} R{new_cursor}  {content}\n"));
            old_cursor += 1;
            new_cursor += 1;
        }
    }

    out
}

/// Which change class `filter_diff` keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Additions,
    Deletions,
}

/// Return a new unified diff containing only context lines plus the chosen
/// change class. Hunk counts are recomputed; hunks that become materially
/// empty (no remaining +/- lines) are dropped.
pub fn filter_diff(patch: &str, mode: FilterMode) -> String {
    let mut out = String::new();

    for hunk in split_hunks(patch) {
        let lines = parse_patch(&hunk.text);
        let mut old_start = None;
        let mut new_start = None;
        let mut old_count = 0u32;
        let mut new_count = 0u32;
        let mut body = String::new();
        let mut has_change = false;

        for l in &lines {
            match (l.old_line, l.new_line) {
                (Some(o), Some(n)) => {
                    old_start.get_or_insert(o);
                    new_start.get_or_insert(n);
                    old_count += 1;
                    new_count += 1;
                    body.push_str(&format!(" {}\n", l.content));
                }
                (Some(o), None) => {
                    if mode == FilterMode::Deletions {
                        old_start.get_or_insert(o);
                        old_count += 1;
                        body.push_str(&format!("-{}\n", l.content));
                        has_change = true;
                    }
                }
                (None, Some(n)) => {
                    if mode == FilterMode::Additions {
                        new_start.get_or_insert(n);
                        new_count += 1;
                        body.push_str(&format!("+{}\n", l.content));
                        has_change = true;
                    }
                }
                (None, None) => {}
            }
        }

        if !has_change {
            continue;
        }

        let old_start = old_start.unwrap_or(0);
        let new_start = new_start.unwrap_or(0);
        let header = format!(
            "@@ -{} +{} @@",
            format_span(old_start, old_count),
            format_span(new_start, new_count)
        );
        out.push_str(&header);
        out.push('\n');
        out.push_str(&body);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED_PATCH: &str = "@@ -1,5 +1,5 @@\n line1\n-old1\n-old2\n+new1\n+new2\n line6\n";

    #[test]
    fn parse_patch_empty_is_empty() {
        assert!(parse_patch("").is_empty());
    }

    #[test]
    fn changed_lines_separates_added_and_removed() {
        let (added, removed) = changed_lines(MIXED_PATCH);
        assert_eq!(added, BTreeSet::from([2, 3]));
        assert_eq!(removed, BTreeSet::from([2, 3]));
    }

    #[test]
    fn context_only_reference_is_rejected() {
        let reference = LineReference::new(1, 1, Side::Right).unwrap();
        assert!(!is_line_reference_valid_for_patch(&reference, MIXED_PATCH));
    }

    #[test]
    fn changed_reference_is_accepted() {
        let reference = LineReference::new(2, 3, Side::Right).unwrap();
        assert!(is_line_reference_valid_for_patch(&reference, MIXED_PATCH));
    }

    #[test]
    fn cross_hunk_reference_is_rejected() {
        let two_hunks = "@@ -1,1 +1,1 @@\n-a\n+b\n@@ -10,1 +10,1 @@\n-c\n+d\n";
        let reference = LineReference::new(1, 10, Side::Right).unwrap();
        assert!(!is_line_reference_valid_for_patch(&reference, two_hunks));
    }

    #[test]
    fn empty_patch_is_never_valid() {
        let reference = LineReference::new(1, 1, Side::Right).unwrap();
        assert!(!is_line_reference_valid_for_patch(&reference, ""));
    }

    #[test]
    fn filter_diff_additions_keeps_context_and_adds() {
        let filtered = filter_diff(MIXED_PATCH, FilterMode::Additions);
        assert!(filtered.starts_with("@@ -1,2 +1,4 @@"));
        assert!(filtered.contains("+new1"));
        assert!(filtered.contains("+new2"));
        assert!(!filtered.contains("-old1"));
    }

    #[test]
    fn filter_diff_is_idempotent() {
        let once = filter_diff(MIXED_PATCH, FilterMode::Additions);
        let twice = filter_diff(&once, FilterMode::Additions);
        assert_eq!(once, twice);
    }

    #[test]
    fn filter_diff_drops_hunks_with_no_remaining_changes() {
        let deletions_only_hunk = "@@ -1,2 +1,1 @@\n line1\n-old1\n";
        let filtered = filter_diff(deletions_only_hunk, FilterMode::Additions);
        assert!(filtered.is_empty());
    }

    #[test]
    fn extract_diff_hunk_zero_context_matches_full_hunk() {
        let hunk = extract_diff_hunk(MIXED_PATCH, 2, 3, Side::Right, 0);
        assert!(hunk.contains("+new1"));
        assert!(hunk.contains("+new2"));
        assert!(!hunk.contains("line1"));
    }

    #[test]
    fn extract_diff_hunk_out_of_range_is_empty() {
        assert_eq!(extract_diff_hunk(MIXED_PATCH, 100, 100, Side::Right, 3), "");
    }

    #[test]
    fn add_line_numbers_labels_each_class() {
        let numbered = add_line_numbers_to_patch(MIXED_PATCH);
        assert!(numbered.contains("L2 -old1"));
        assert!(numbered.contains("R2 +new1"));
        assert!(numbered.contains("L1 R1"));
    }
}
