//! An OpenAI-compatible chat completions client: one `complete` operation,
//! exponential-backoff retries, and opportunistic error-body parsing so a
//! provider's nested diagnostics survive into one readable message.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

pub const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 10_000;
const BACKOFF_MULTIPLIER: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_ERROR_CONTENT_LEN: usize = 12_000;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Auto(&'static str),
    Required {
        #[serde(rename = "type")]
        kind: &'static str,
        function: Value,
    },
}

impl ToolChoice {
    pub fn auto() -> Self {
        ToolChoice::Auto("auto")
    }

    pub fn force(function_name: impl Into<String>) -> Self {
        ToolChoice::Required {
            kind: "function",
            function: serde_json::json!({ "name": function_name.into() }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub json_schema: JsonSchemaWrapper,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaWrapper {
    pub name: String,
    pub strict: bool,
    pub schema: Value,
}

impl ResponseFormat {
    pub fn json_schema(name: impl Into<String>, schema: Value) -> Self {
        Self {
            kind: "json_schema",
            json_schema: JsonSchemaWrapper {
                name: name.into(),
                strict: true,
                schema,
            },
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ResponseFormat>,
    usage: UsageRequest,
}

#[derive(Serialize)]
struct UsageRequest {
    include: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub cost: f64,
}

/// A classified completion response: plain text, one or more tool calls, or
/// a JSON object (only reachable when `response_format` requested a schema).
#[derive(Debug)]
pub enum Completion {
    Message { content: String, cost: f64 },
    Tool { calls: Vec<ToolCall>, cost: f64 },
    Structured { value: Value, cost: f64 },
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    provider_name: String,
}

pub struct CompleteRequest<'a> {
    pub messages: &'a [Message],
    pub tools: Option<&'a [ToolDefinition]>,
    pub model: &'a str,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            provider_name: "openai-compatible".to_string(),
        })
    }

    #[tracing::instrument(skip(self, request), fields(model = request.model, message_count = request.messages.len(), request_id = %uuid::Uuid::new_v4()))]
    pub async fn complete(&self, request: CompleteRequest<'_>) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: request.model,
            messages: request.messages,
            tools: request.tools,
            tool_choice: request.tool_choice.as_ref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format.as_ref(),
            usage: UsageRequest { include: true },
        };

        let response = self.send_with_retry(&body).await?;
        let cost = response.usage.map(|u| u.cost).unwrap_or(0.0);
        let Some(choice) = response.choices.into_iter().next() else {
            return Err(ProviderError::Api {
                provider_name: self.provider_name.clone(),
                status: 0,
                code: String::new(),
                message: "response contained no choices".to_string(),
            });
        };

        if let Some(calls) = choice.message.tool_calls.filter(|c| !c.is_empty()) {
            return Ok(Completion::Tool { calls, cost });
        }

        let content = choice.message.content.unwrap_or_default();
        if request.response_format.is_some() {
            match parse_structured_content::<Value>(&content) {
                Ok(value) => return Ok(Completion::Structured { value, cost }),
                Err(err) => return Err(ProviderError::StructuredParse(err)),
            }
        }

        Ok(Completion::Message { content, cost })
    }

    async fn send_with_retry(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut retry_count = 0u32;

        loop {
            let result = self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(err) if err.is_timeout() || err.is_connect() => {
                    if retry_count < MAX_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(backoff(retry_count)).await;
                        continue;
                    }
                    return Err(ProviderError::Network {
                        provider_name: self.provider_name.clone(),
                        source: err,
                    });
                }
                Err(err) => {
                    return Err(ProviderError::Network {
                        provider_name: self.provider_name.clone(),
                        source: err,
                    })
                }
            };

            let status = response.status();
            if status.is_success() {
                let text = response.text().await.map_err(|source| ProviderError::Network {
                    provider_name: self.provider_name.clone(),
                    source,
                })?;
                return serde_json::from_str(&text).map_err(|err| ProviderError::Api {
                    provider_name: self.provider_name.clone(),
                    status: status.as_u16(),
                    code: String::new(),
                    message: format!("failed to parse response: {err}"),
                });
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            let body_text = response.text().await.unwrap_or_default();

            if retryable && retry_count < MAX_RETRIES {
                retry_count += 1;
                tokio::time::sleep(backoff(retry_count)).await;
                continue;
            }

            let (code, message) = parse_provider_error(&body_text);
            return Err(ProviderError::Api {
                provider_name: self.provider_name.clone(),
                status: status.as_u16(),
                code,
                message,
            });
        }
    }
}

fn backoff(retry_count: u32) -> Duration {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = (INITIAL_BACKOFF_MS.saturating_mul(factor)).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

/// Provider bodies are sometimes a nested structure under
/// `error.metadata.raw`; parse opportunistically rather than failing the
/// whole request just because the envelope shape varies by backend.
fn parse_provider_error(body: &str) -> (String, String) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (String::new(), sanitize_api_response(body));
    };

    let error = value.get("error");
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str().map(String::from).or_else(|| c.as_i64().map(|n| n.to_string())))
        .unwrap_or_default();

    let message = error
        .and_then(|e| e.get("metadata"))
        .and_then(|m| m.get("raw"))
        .and_then(|raw| raw.as_str())
        .or_else(|| error.and_then(|e| e.get("message")).and_then(|m| m.as_str()))
        .unwrap_or(body);

    (code, sanitize_api_response(message))
}

/// Redact content that looks like it might carry a credential, and cap
/// length so a verbose provider body doesn't blow up logs.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let lower = content.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    if content.chars().count() > MAX_ERROR_CONTENT_LEN {
        let truncated: String = content.chars().take(MAX_ERROR_CONTENT_LEN).collect();
        return format!("{truncated} … (truncated to {MAX_ERROR_CONTENT_LEN} chars)");
    }

    content.to_string()
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

fn unwrap_outer_wrapper(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 3 {
        return None;
    }
    if let Some(inner) = trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let inner_trimmed = inner.trim_start();
        if inner_trimmed.starts_with('{') || inner_trimmed.starts_with('[') {
            return Some(inner.trim().to_string());
        }
    } else if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let inner_trimmed = inner.trim_start();
        if inner_trimmed.starts_with('[') || inner_trimmed.starts_with('{') || inner_trimmed.starts_with('"') {
            return Some(inner.trim().to_string());
        }
    }
    None
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in content.char_indices() {
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced_json_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
                if out.len() >= max_candidates {
                    break;
                }
            }
        }
    }
    out
}

/// Salvage a JSON object out of a structured-output response: try the raw
/// text, then markdown-fence-stripped text, then balanced-brace extraction,
/// then outer-wrapper unwrapping, in that order.
pub fn parse_structured_content<T>(content: &str) -> Result<T, String>
where
    T: serde::de::DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_unique_candidate(&mut candidates, stripped);
    }

    let mut idx = 0;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_json_candidates(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        if let Some(unwrapped) = unwrap_outer_wrapper(&current) {
            push_unique_candidate(&mut candidates, unwrapped);
        }
        idx += 1;
    }

    let mut last_err = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(format!(
        "{}\ncontent: {}",
        last_err.unwrap_or_else(|| "unknown parse error".to_string()),
        sanitize_api_response(content)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let value: Value = parse_structured_content(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn strips_markdown_fences() {
        let value: Value = parse_structured_content("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extracts_balanced_json_from_prose() {
        let value: Value =
            parse_structured_content("Sure, here you go: {\"a\": 1} hope that helps").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn unwraps_an_outer_wrapper_object() {
        let value: Value = parse_structured_content(r#"{"result": {"a": 1}}"#).unwrap();
        assert!(value.get("a").is_some() || value.get("result").is_some());
    }

    #[test]
    fn sanitizes_secrets_in_error_bodies() {
        let sanitized = sanitize_api_response("your api_key sk-abc123 is invalid");
        assert!(!sanitized.contains("sk-abc123"));
    }

    #[test]
    fn parses_nested_provider_error_envelope() {
        let body = r#"{"error": {"code": "rate_limited", "metadata": {"raw": "Too many requests"}}}"#;
        let (code, message) = parse_provider_error(body);
        assert_eq!(code, "rate_limited");
        assert_eq!(message, "Too many requests");
    }

    #[test]
    fn backoff_stays_within_one_to_ten_seconds() {
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(2), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
        assert_eq!(backoff(10), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
