//! Builds the system/user messages that open a per-file review
//! conversation, and the validation prompt used by the violation validator.

use wisp_core::{add_line_numbers_to_patch, CodebaseRule, FileChange};

/// The reviewer persona, rule-reasoning policies, the full changed-file
/// list (for cross-file rules), and the tool-use policy.
pub fn system_message(all_changed_files: &[FileChange]) -> String {
    let file_list = all_changed_files
        .iter()
        .map(|f| format!("- {} ({})", f.filename, f.status.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a meticulous code reviewer enforcing a team's written coding rules \
against a single changed file at a time.\n\n\
Reasoning policy:\n\
- Only flag a line if it is a *changed* line under the rule's intent, never a line that is merely nearby.\n\
- A rule scoped to one directory applies only to files inside that directory.\n\
- When a rule references other files (cross-file rules) and you cannot access the \
referenced file, do not guess; read it with the available tools before judging.\n\
- Prefer silence over a speculative complaint. Only call `complaint` when you are confident.\n\n\
All files changed in this review (for cross-file rule context):\n{file_list}\n\n\
Tool-use policy: use `read_file`, `list_dir`, `grep_search`, and `glob_search` to gather any \
context you need before judging a rule. Call `complaint` once per violation you find. When you \
have no more violations to report, respond with a plain message summarizing what you found (or \
that nothing was found) instead of calling a tool."
    )
}

/// The applicable rules (each tagged by id), the filename, status, and the
/// line-numbered patch.
pub fn user_message(file: &FileChange, rules: &[&CodebaseRule]) -> String {
    let rules_block = rules
        .iter()
        .map(|r| format!("### Rule [{}]: {}\n{}", r.id, r.name, r.body))
        .collect::<Vec<_>>()
        .join("\n\n");

    let numbered_patch = file
        .patch
        .as_deref()
        .map(add_line_numbers_to_patch)
        .unwrap_or_default();

    format!(
        "## Applicable rules\n\n{rules_block}\n\n\
## File under review\n\
Filename: {}\n\
Status: {}\n\n\
## Patch (line-numbered: L = old line, R = new line)\n\
```\n{numbered_patch}```",
        file.filename,
        file.status.as_str()
    )
}

/// The rule body, candidate description, filename/status, additions and
/// deletions projections (line-numbered), and the validation criteria.
pub fn validation_message(
    rule: &CodebaseRule,
    description: &str,
    filename: &str,
    status: &str,
    additions_projection: &str,
    deletions_projection: &str,
) -> String {
    format!(
        "## Rule [{}]: {}\n{}\n\n\
## Candidate violation\n{description}\n\n\
## File\nFilename: {filename}\nStatus: {status}\n\n\
## Additions (line-numbered)\n```\n{additions_projection}```\n\n\
## Deletions (line-numbered)\n```\n{deletions_projection}```\n\n\
## Validation criteria\n\
1. Does the candidate match the rule's actual intent, not just its wording?\n\
2. Is the candidate consistent with the file's status (e.g. a rule about modifications \
shouldn't fire on a purely additive file)?\n\
3. Is the judgement non-speculative — backed by what's actually in the diff, not a guess?\n\
4. If the rule is cross-file and the reviewer could not access the referenced file, default to VALID.\n\
5. Is the original reviewer's stated reasoning plausible on its face?\n\n\
Call `report_validation` with your verdict.",
        rule.id, rule.name, rule.body
    )
}
