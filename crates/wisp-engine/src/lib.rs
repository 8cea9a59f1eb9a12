//! Async engine: the LLM client adapter, the per-file tool-calling review
//! loop, the violation validator, and the bounded-concurrency orchestrator
//! that ties them together over a set of changed files.

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod review_loop;
pub mod tools_schema;
pub mod validator;

pub use client::{Completion, LlmClient, Message, ToolCall, ToolChoice, ToolDefinition};
pub use error::{ProviderError, ReviewError};
pub use orchestrator::{
    CancellationToken, FileOutcome, LifecycleEvent, Orchestrator, OrchestratorDeps,
    OrchestratorHooks, SkipReason,
};
pub use review_loop::{review_file, ReviewLoopDeps};
