use thiserror::Error;

/// Errors raised while talking to an OpenAI-compatible chat completions
/// endpoint.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider_name} request failed ({status}{code}): {message}")]
    Api {
        provider_name: String,
        status: u16,
        code: String,
        message: String,
    },
    #[error("request to {provider_name} timed out")]
    Timeout { provider_name: String },
    #[error("network error contacting {provider_name}: {source}")]
    Network {
        provider_name: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no API key configured")]
    MissingApiKey,
    #[error("failed to parse structured response: {0}")]
    StructuredParse(String),
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("request aborted")]
    Aborted,
}

/// The umbrella every per-file failure converts into. Each variant names
/// which of the taxonomy's skip-reason buckets applies so the orchestrator
/// never has to inspect message text to decide how to report a failure.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("input error: {0}")]
    InputError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("external tool error: {0}")]
    ExternalToolError(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("aborted")]
    Aborted,
}

impl From<wisp_adapters::ToolError> for ReviewError {
    fn from(err: wisp_adapters::ToolError) -> Self {
        match err {
            wisp_adapters::ToolError::NotFound(path) => ReviewError::NotFound(path),
            other => ReviewError::ExternalToolError(other.to_string()),
        }
    }
}

impl From<wisp_core::PatchError> for ReviewError {
    fn from(err: wisp_core::PatchError) -> Self {
        ReviewError::InputError(err.to_string())
    }
}
