//! JSON schemas for the tool-calling contract exposed to the reviewer model,
//! plus the argument shapes each tool call is deserialized into.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::ToolDefinition;

pub fn read_file_tool() -> ToolDefinition {
    ToolDefinition::new(
        "read_file",
        "Read a range of lines (or the entire file) from a file in the workspace.",
        json!({
            "type": "object",
            "properties": {
                "target_file": { "type": "string", "description": "Workspace-relative path to read." },
                "should_read_entire_file": { "type": "boolean" },
                "start_line_one_indexed": { "type": "integer" },
                "end_line_one_indexed_inclusive": { "type": "integer" }
            },
            "required": ["target_file", "should_read_entire_file", "start_line_one_indexed", "end_line_one_indexed_inclusive"]
        }),
    )
}

pub fn list_dir_tool() -> ToolDefinition {
    ToolDefinition::new(
        "list_dir",
        "List the files and subdirectories of a workspace-relative directory.",
        json!({
            "type": "object",
            "properties": {
                "relative_workspace_path": { "type": "string" }
            },
            "required": ["relative_workspace_path"]
        }),
    )
}

pub fn grep_search_tool() -> ToolDefinition {
    ToolDefinition::new(
        "grep_search",
        "Fast regex search across the workspace using ripgrep, capped at 50 matches.",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Regex pattern." },
                "include_pattern": { "type": "string" },
                "exclude_pattern": { "type": "string" },
                "case_sensitive": { "type": "boolean" }
            },
            "required": ["query"]
        }),
    )
}

pub fn glob_search_tool() -> ToolDefinition {
    ToolDefinition::new(
        "glob_search",
        "Find files matching a glob pattern, newest modification time first.",
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" }
            },
            "required": ["pattern"]
        }),
    )
}

pub fn complaint_tool() -> ToolDefinition {
    ToolDefinition::new(
        "complaint",
        "Report a candidate rule violation found in the file under review.",
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "line_start": { "type": "integer" },
                "line_end": { "type": "integer" },
                "line_side": { "type": "string", "enum": ["left", "right"] },
                "description": { "type": "string" },
                "rule_id": { "type": "string" }
            },
            "required": ["file_path", "line_start", "line_end", "line_side", "description", "rule_id"]
        }),
    )
}

pub fn review_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        read_file_tool(),
        list_dir_tool(),
        grep_search_tool(),
        glob_search_tool(),
        complaint_tool(),
    ]
}

pub fn report_validation_tool() -> ToolDefinition {
    ToolDefinition::new(
        "report_validation",
        "Report whether a candidate violation is valid.",
        json!({
            "type": "object",
            "properties": {
                "is_valid": { "type": "boolean" },
                "reasoning": { "type": "string" }
            },
            "required": ["is_valid", "reasoning"]
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct ReadFileToolArgs {
    pub target_file: String,
    pub should_read_entire_file: bool,
    pub start_line_one_indexed: Option<i64>,
    pub end_line_one_indexed_inclusive: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListDirToolArgs {
    pub relative_workspace_path: String,
}

#[derive(Debug, Deserialize)]
pub struct GrepSearchToolArgs {
    pub query: String,
    #[serde(default)]
    pub include_pattern: Option<String>,
    #[serde(default)]
    pub exclude_pattern: Option<String>,
    #[serde(default)]
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GlobSearchToolArgs {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ComplaintToolArgs {
    pub file_path: String,
    #[serde(default)]
    pub line_start: Option<Value>,
    #[serde(default)]
    pub line_end: Option<Value>,
    pub line_side: String,
    pub description: String,
    pub rule_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportValidationArgs {
    pub is_valid: bool,
    pub reasoning: String,
}
