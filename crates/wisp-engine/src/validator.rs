//! The violation validator: a second, narrowly-scoped LLM call that accepts
//! or rejects one candidate violation at a time.

use wisp_core::{add_line_numbers_to_patch, extract_diff_hunk, filter_diff, CodebaseRule, FilterMode, LineReference};

use crate::client::{CompleteRequest, Completion, LlmClient, Message, ToolChoice};
use crate::error::ProviderError;
use crate::prompts::validation_message;
use crate::tools_schema::{report_validation_tool, ReportValidationArgs};

const VALIDATOR_TEMPERATURE: f32 = 0.1;
const VALIDATOR_MAX_TOKENS: u32 = 300;
const VALIDATOR_CONTEXT_LINES: u32 = 3;

pub struct ValidationVerdict {
    pub is_valid: bool,
    pub reasoning: String,
    pub cost: f64,
}

pub struct Candidate<'a> {
    pub description: &'a str,
    pub line: LineReference,
    pub rule: &'a CodebaseRule,
    pub filename: &'a str,
    pub status: &'a str,
    pub patch: &'a str,
}

#[tracing::instrument(skip(client, candidate), fields(rule_id = %candidate.rule.id))]
pub async fn validate(
    client: &LlmClient,
    model: &str,
    candidate: Candidate<'_>,
) -> Result<ValidationVerdict, ProviderError> {
    let hunk = extract_diff_hunk(
        candidate.patch,
        candidate.line.start,
        candidate.line.end,
        candidate.line.side,
        VALIDATOR_CONTEXT_LINES,
    );

    let additions = add_line_numbers_to_patch(&filter_diff(&hunk, FilterMode::Additions));
    let deletions = add_line_numbers_to_patch(&filter_diff(&hunk, FilterMode::Deletions));

    let prompt = validation_message(
        candidate.rule,
        candidate.description,
        candidate.filename,
        candidate.status,
        &additions,
        &deletions,
    );

    let messages = vec![Message::user(prompt)];
    let tools = [report_validation_tool()];

    let completion = client
        .complete(CompleteRequest {
            messages: &messages,
            tools: Some(&tools),
            model,
            tool_choice: Some(ToolChoice::force("report_validation")),
            temperature: Some(VALIDATOR_TEMPERATURE),
            max_tokens: Some(VALIDATOR_MAX_TOKENS),
            response_format: None,
        })
        .await?;

    match completion {
        Completion::Tool { calls, cost } => {
            let Some(call) = calls.into_iter().find(|c| c.function.name == "report_validation") else {
                return Err(ProviderError::StructuredParse(
                    "model did not call report_validation".to_string(),
                ));
            };
            let args: ReportValidationArgs = serde_json::from_str(&call.function.arguments)
                .map_err(|e| ProviderError::StructuredParse(e.to_string()))?;
            Ok(ValidationVerdict {
                is_valid: args.is_valid,
                reasoning: args.reasoning,
                cost,
            })
        }
        _ => Err(ProviderError::StructuredParse(
            "validator response was not a tool call".to_string(),
        )),
    }
}
