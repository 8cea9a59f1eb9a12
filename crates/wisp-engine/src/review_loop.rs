//! The per-file tool-calling review loop: builds the conversation, drives
//! rounds of tool execution against the sandbox, buffers candidate
//! violations, and hands them to the validator before returning the
//! finished `FileAnalysis`.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use wisp_core::{
    CodebaseRule, FileAnalysis, FileChange, LineReference, RejectedViolation, Side, Violation,
    NO_APPLICABLE_RULES, NO_PATCH_FOUND, ROUND_LIMIT_EXCEEDED,
};
use wisp_adapters::tools::{self, ComplaintArgs, GrepSearchArgs, ListDirResult, ReadFileArgs};

use crate::client::{CompleteRequest, Completion, LlmClient, Message, ToolCall, ToolChoice};
use crate::error::ReviewError;
use crate::prompts::{system_message, user_message};
use crate::tools_schema::{
    review_tool_definitions, ComplaintToolArgs, GlobSearchToolArgs, GrepSearchToolArgs,
    ListDirToolArgs, ReadFileToolArgs,
};
use crate::validator::{self, Candidate};

const ROUND_CAP: u32 = 8;

pub struct ReviewLoopDeps<'a> {
    pub client: &'a LlmClient,
    pub review_model: &'a str,
    pub validator_model: &'a str,
    pub workspace_root: &'a Path,
    pub ripgrep_binary: &'a str,
}

struct CandidateViolation {
    description: String,
    line: LineReference,
    rule: CodebaseRule,
}

pub async fn review_file(
    file: &FileChange,
    all_files: &[FileChange],
    rules: Vec<CodebaseRule>,
    deps: ReviewLoopDeps<'_>,
) -> Result<FileAnalysis, ReviewError> {
    let Some(patch) = file.patch.clone() else {
        return Ok(FileAnalysis::empty(NO_PATCH_FOUND, rules));
    };
    if rules.is_empty() {
        return Ok(FileAnalysis::empty(NO_APPLICABLE_RULES, rules));
    }

    let rule_refs: Vec<&CodebaseRule> = rules.iter().collect();
    let mut messages = vec![
        Message::system(system_message(all_files)),
        Message::user(user_message(file, &rule_refs)),
    ];

    let tools = review_tool_definitions();
    let mut total_cost = 0.0f64;
    let mut visited_files: Vec<String> = Vec::new();
    let mut candidates: Vec<CandidateViolation> = Vec::new();
    let mut explanation = String::new();
    let mut round = 0u32;

    loop {
        round += 1;

        let completion = deps
            .client
            .complete(CompleteRequest {
                messages: &messages,
                tools: Some(&tools),
                model: deps.review_model,
                tool_choice: Some(ToolChoice::auto()),
                temperature: None,
                max_tokens: None,
                response_format: None,
            })
            .await?;

        match completion {
            Completion::Message { content, cost } => {
                total_cost += cost;
                explanation = content;
                break;
            }
            Completion::Structured { value, cost } => {
                total_cost += cost;
                explanation = value.to_string();
                break;
            }
            Completion::Tool { calls, cost } => {
                total_cost += cost;
                messages.push(Message::assistant_with_tool_calls(calls.clone()));

                let root = deps.workspace_root.to_path_buf();
                let rg_binary = deps.ripgrep_binary.to_string();
                let filename = file.filename.clone();
                let patch_for_tools = patch.clone();
                let rules_for_tools = rules.clone();

                let futures_iter = calls.iter().cloned().map(|call| {
                    let root = root.clone();
                    let rg_binary = rg_binary.clone();
                    let filename = filename.clone();
                    let patch_for_tools = patch_for_tools.clone();
                    let rules_for_tools = rules_for_tools.clone();
                    async move { execute_tool_call(&root, &rg_binary, &filename, &patch_for_tools, &rules_for_tools, call).await }
                });

                let results = join_all(futures_iter).await;

                if round >= ROUND_CAP {
                    for r in &results {
                        if let ToolOutcome::VisitedFile(path) = &r.outcome {
                            visited_files.push(path.clone());
                        }
                        if let ToolOutcome::Candidate(c) = &r.outcome {
                            candidates.push(CandidateViolation {
                                description: c.description.clone(),
                                line: c.line,
                                rule: c.rule.clone(),
                            });
                        }
                    }
                    explanation = ROUND_LIMIT_EXCEEDED.to_string();
                    break;
                }

                for r in results {
                    messages.push(Message::tool_result(r.tool_call_id.clone(), r.content.clone()));
                    match r.outcome {
                        ToolOutcome::VisitedFile(path) => visited_files.push(path),
                        ToolOutcome::Candidate(c) => candidates.push(CandidateViolation {
                            description: c.description,
                            line: c.line,
                            rule: c.rule,
                        }),
                        ToolOutcome::None => {}
                    }
                }
            }
        }
    }

    let (violations, rejected, validator_cost) =
        validate_candidates(&deps, file, &patch, candidates).await?;
    total_cost += validator_cost;

    let mut analysis = FileAnalysis {
        violations,
        explanation,
        rules,
        visited_files,
        rejected_violations: if rejected.is_empty() { None } else { Some(rejected) },
        cost: total_cost,
    };
    analysis.finalize_visited_files(&file.filename);
    Ok(analysis)
}

struct AcceptedCandidate {
    description: String,
    line: LineReference,
    rule: CodebaseRule,
}

enum ToolOutcome {
    None,
    VisitedFile(String),
    Candidate(AcceptedCandidate),
}

struct ToolExecutionResult {
    tool_call_id: String,
    content: String,
    outcome: ToolOutcome,
}

async fn execute_tool_call(
    root: &Path,
    ripgrep_binary: &str,
    file_under_review: &str,
    patch: &str,
    rules: &[CodebaseRule],
    call: ToolCall,
) -> ToolExecutionResult {
    let id = call.id.clone();
    let name = call.function.name.clone();
    let args_json = call.function.arguments.clone();

    match name.as_str() {
        "read_file" => execute_read_file(root, &id, &args_json).await,
        "list_dir" => execute_list_dir(root, &id, &args_json).await,
        "grep_search" => execute_grep_search(root, ripgrep_binary, &id, &args_json).await,
        "glob_search" => execute_glob_search(root, &id, &args_json).await,
        "complaint" => execute_complaint(file_under_review, patch, rules, &id, &args_json),
        other => ToolExecutionResult {
            tool_call_id: id,
            content: format!("unknown tool: {other}"),
            outcome: ToolOutcome::None,
        },
    }
}

async fn execute_read_file(root: &Path, id: &str, args_json: &str) -> ToolExecutionResult {
    let args: Result<ReadFileToolArgs, _> = serde_json::from_str(args_json);
    let root = root.to_path_buf();
    let result = match args {
        Ok(args) => {
            let target_file = args.target_file.clone();
            tokio::task::spawn_blocking(move || {
                tools::read_file(
                    &root,
                    ReadFileArgs {
                        target_file,
                        start: args.start_line_one_indexed,
                        end: args.end_line_one_indexed_inclusive,
                        read_entire: args.should_read_entire_file,
                    },
                )
            })
            .await
            .unwrap()
        }
        Err(err) => Err(wisp_adapters::ToolError::ComplaintRejected(format!("invalid arguments: {err}"))),
    };

    match result {
        Ok(r) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: r.content.clone(),
            outcome: extract_read_target(args_json).map(ToolOutcome::VisitedFile).unwrap_or(ToolOutcome::None),
        },
        Err(err) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!("error: {err}"),
            outcome: ToolOutcome::None,
        },
    }
}

fn extract_read_target(args_json: &str) -> Option<String> {
    serde_json::from_str::<ReadFileToolArgs>(args_json)
        .ok()
        .map(|a| a.target_file)
}

async fn execute_list_dir(root: &Path, id: &str, args_json: &str) -> ToolExecutionResult {
    let args: Result<ListDirToolArgs, _> = serde_json::from_str(args_json);
    let root = root.to_path_buf();
    let result: Result<ListDirResult, wisp_adapters::ToolError> = match args {
        Ok(args) => {
            let path = args.relative_workspace_path.clone();
            tokio::task::spawn_blocking(move || tools::list_dir(&root, &path))
                .await
                .unwrap()
        }
        Err(err) => Err(wisp_adapters::ToolError::ComplaintRejected(format!("invalid arguments: {err}"))),
    };

    match result {
        Ok(r) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!(
                "path: {}\nfiles: {:?}\ndirectories: {:?}",
                r.path, r.files, r.directories
            ),
            outcome: ToolOutcome::None,
        },
        Err(err) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!("error: {err}"),
            outcome: ToolOutcome::None,
        },
    }
}

async fn execute_grep_search(
    root: &Path,
    ripgrep_binary: &str,
    id: &str,
    args_json: &str,
) -> ToolExecutionResult {
    let args: Result<GrepSearchToolArgs, _> = serde_json::from_str(args_json);
    let root = root.to_path_buf();
    let binary = ripgrep_binary.to_string();
    let result = match args {
        Ok(args) => tokio::task::spawn_blocking(move || {
            tools::grep_search(
                &root,
                &binary,
                GrepSearchArgs {
                    query: args.query,
                    include_pattern: args.include_pattern,
                    exclude_pattern: args.exclude_pattern,
                    case_sensitive: args.case_sensitive,
                },
            )
        })
        .await
        .unwrap(),
        Err(err) => Err(wisp_adapters::ToolError::ComplaintRejected(format!("invalid arguments: {err}"))),
    };

    match result {
        Ok(matches) => {
            if matches.is_empty() {
                ToolExecutionResult {
                    tool_call_id: id.to_string(),
                    content: "no matches found".to_string(),
                    outcome: ToolOutcome::None,
                }
            } else {
                let content = matches
                    .iter()
                    .map(|m| format!("{}:{}:{}", m.file, m.line_number, m.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolExecutionResult {
                    tool_call_id: id.to_string(),
                    content,
                    outcome: ToolOutcome::None,
                }
            }
        }
        Err(err) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!("error: {err}"),
            outcome: ToolOutcome::None,
        },
    }
}

async fn execute_glob_search(root: &Path, id: &str, args_json: &str) -> ToolExecutionResult {
    let args: Result<GlobSearchToolArgs, _> = serde_json::from_str(args_json);
    let root = root.to_path_buf();
    let result = match args {
        Ok(args) => tokio::task::spawn_blocking(move || {
            tools::glob_search(&root, &args.pattern, args.path.as_deref())
        })
        .await
        .unwrap(),
        Err(err) => Err(wisp_adapters::ToolError::ComplaintRejected(format!("invalid arguments: {err}"))),
    };

    match result {
        Ok(paths) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: paths.join("\n"),
            outcome: ToolOutcome::None,
        },
        Err(err) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!("error: {err}"),
            outcome: ToolOutcome::None,
        },
    }
}

fn execute_complaint(
    file_under_review: &str,
    patch: &str,
    rules: &[CodebaseRule],
    id: &str,
    args_json: &str,
) -> ToolExecutionResult {
    let args: ComplaintToolArgs = match serde_json::from_str(args_json) {
        Ok(a) => a,
        Err(err) => {
            return ToolExecutionResult {
                tool_call_id: id.to_string(),
                content: format!("rejected: invalid arguments: {err}"),
                outcome: ToolOutcome::None,
            }
        }
    };

    let side = match args.line_side.as_str() {
        "left" => Side::Left,
        "right" => Side::Right,
        other => {
            return ToolExecutionResult {
                tool_call_id: id.to_string(),
                content: format!("rejected: unknown line_side {other:?}"),
                outcome: ToolOutcome::None,
            }
        }
    };

    let (Some(start), Some(end)) = (as_u32(&args.line_start), as_u32(&args.line_end)) else {
        return ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: "rejected: line numbers are missing or non-integer".to_string(),
            outcome: ToolOutcome::None,
        };
    };

    let line = match LineReference::new(start, end, side) {
        Ok(l) => l,
        Err(reason) => {
            return ToolExecutionResult {
                tool_call_id: id.to_string(),
                content: format!("rejected: {reason}"),
                outcome: ToolOutcome::None,
            }
        }
    };

    match tools::complaint(
        file_under_review,
        Some(patch),
        rules,
        ComplaintArgs {
            file_path: args.file_path,
            line,
            description: args.description,
            rule_id: args.rule_id,
        },
    ) {
        Ok(accepted) => {
            let rule = rules
                .iter()
                .find(|r| r.id == accepted.rule_id)
                .cloned()
                .expect("rule_id already validated against this rule set");
            ToolExecutionResult {
                tool_call_id: id.to_string(),
                content: "accepted".to_string(),
                outcome: ToolOutcome::Candidate(AcceptedCandidate {
                    description: accepted.description,
                    line: accepted.line,
                    rule,
                }),
            }
        }
        Err(err) => ToolExecutionResult {
            tool_call_id: id.to_string(),
            content: format!("rejected: {err}"),
            outcome: ToolOutcome::None,
        },
    }
}

fn as_u32(value: &Option<serde_json::Value>) -> Option<u32> {
    value.as_ref().and_then(|v| v.as_u64()).map(|v| v as u32)
}

async fn validate_candidates(
    deps: &ReviewLoopDeps<'_>,
    file: &FileChange,
    patch: &str,
    candidates: Vec<CandidateViolation>,
) -> Result<(Vec<Violation>, Vec<RejectedViolation>, f64), ReviewError> {
    if candidates.is_empty() {
        return Ok((Vec::new(), Vec::new(), 0.0));
    }

    let status = file.status.as_str();
    let filename = Arc::new(file.filename.clone());
    let patch = Arc::new(patch.to_string());

    let futures_iter = candidates.into_iter().map(|candidate| {
        let filename = Arc::clone(&filename);
        let patch = Arc::clone(&patch);
        async move {
            let verdict = validator::validate(
                deps.client,
                deps.validator_model,
                Candidate {
                    description: &candidate.description,
                    line: candidate.line,
                    rule: &candidate.rule,
                    filename: &filename,
                    status,
                    patch: &patch,
                },
            )
            .await;
            (candidate, verdict)
        }
    });

    let results = join_all(futures_iter).await;

    let mut violations = Vec::new();
    let mut rejected = Vec::new();
    let mut cost = 0.0;

    for (candidate, verdict) in results {
        match verdict {
            Ok(v) => {
                cost += v.cost;
                if v.is_valid {
                    violations.push(Violation {
                        description: candidate.description,
                        line: candidate.line,
                        rule: candidate.rule,
                        validation_reasoning: Some(v.reasoning),
                        is_cached: false,
                    });
                } else {
                    rejected.push(RejectedViolation {
                        description: candidate.description,
                        line: candidate.line,
                        rule_id: candidate.rule.id,
                        reasoning: v.reasoning,
                    });
                }
            }
            Err(err) => {
                rejected.push(RejectedViolation {
                    description: candidate.description,
                    line: candidate.line,
                    rule_id: candidate.rule.id,
                    reasoning: format!("validator error: {err}"),
                });
            }
        }
    }

    Ok((violations, rejected, cost))
}
