//! The bounded-concurrency orchestrator (§4.H): dispatches one Review Loop
//! per changed file, consults the cache before spending any LLM calls, caps
//! in-flight reviews at a concurrency ceiling, and serialises hook
//! invocations so observers never see interleaved updates from two files.
//!
//! Concurrency here is cooperative, not OS-thread parallel: every in-flight
//! review is a future polled by this one task via `FuturesUnordered`, which
//! is what lets the dispatch loop eagerly refill a finished slot the moment
//! its future resolves (work-stealing, not batched rounds).

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, Notify};

use wisp_adapters::{freshness_token, ReviewCache};
use wisp_core::{rules_for_file, CacheEntry, CodebaseRule, FileAnalysis, FileChange, VisitedFileRecord};

use crate::client::LlmClient;
use crate::error::ReviewError;
use crate::review_loop::{review_file, ReviewLoopDeps};

/// Cooperative cancellation signal. Checked at dispatch time and raced
/// against every in-flight review's suspension points so an external abort
/// stops new work immediately and lets running tasks observe it without a
/// forced unwind.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested. Race this against a
    /// suspension point with `tokio::select!` to make it abortable.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a file was reported skipped rather than completed (§6 skip reasons).
#[derive(Debug, Clone)]
pub enum SkipReason {
    NoMatchingRules,
    Cached,
    Error(String),
}

/// The per-file lifecycle a hook observer sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Queued,
    Processing,
    Completed,
    Skipped,
}

/// The terminal state of one file's review.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Completed { filename: String, analysis: FileAnalysis },
    Skipped { filename: String, reason: SkipReason, analysis: Option<FileAnalysis> },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Completed { filename, .. } => filename,
            FileOutcome::Skipped { filename, .. } => filename,
        }
    }
}

/// Observer hooks. MUST be invoked only from the orchestrator's own dispatch
/// loop, never from inside a spawned review task, so two files' updates are
/// never interleaved from the observer's point of view.
pub trait OrchestratorHooks: Send + Sync {
    fn on_start(&self, _filename: &str) {}
    fn on_update_file(&self, _filename: &str, _event: LifecycleEvent) {}
    fn on_complete(&self, _outcomes: &[FileOutcome]) {}
    fn on_abort(&self) {}
}

/// An `OrchestratorHooks` that does nothing; the default for callers that
/// only want the returned outcome list.
pub struct NoopHooks;
impl OrchestratorHooks for NoopHooks {}

pub struct OrchestratorDeps<'a> {
    pub client: &'a LlmClient,
    pub review_model: &'a str,
    pub validator_model: &'a str,
    pub workspace_root: &'a Path,
    pub ripgrep_binary: &'a str,
    pub concurrency: usize,
}

pub struct Orchestrator<'a> {
    deps: OrchestratorDeps<'a>,
    cache: Arc<Mutex<ReviewCache>>,
    cancel: CancellationToken,
}

struct PendingReview {
    file: FileChange,
    applicable_rules: Vec<CodebaseRule>,
    rule_ids: Vec<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(deps: OrchestratorDeps<'a>, cache: Arc<Mutex<ReviewCache>>, cancel: CancellationToken) -> Self {
        Self { deps, cache, cancel }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole review request: filter rules per file, resolve cache
    /// hits synchronously, then drive the remaining files' Review Loops at
    /// the configured concurrency cap.
    pub async fn run(
        &self,
        files: Vec<FileChange>,
        rules: &[CodebaseRule],
        hooks: &dyn OrchestratorHooks,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        let mut queue: VecDeque<PendingReview> = VecDeque::new();

        for file in files {
            hooks.on_start(&file.filename);
            hooks.on_update_file(&file.filename, LifecycleEvent::Queued);

            let applicable_rules: Vec<CodebaseRule> = rules_for_file(rules, &file.filename)
                .into_iter()
                .cloned()
                .collect();

            if applicable_rules.is_empty() {
                hooks.on_update_file(&file.filename, LifecycleEvent::Skipped);
                outcomes.push(FileOutcome::Skipped {
                    filename: file.filename,
                    reason: SkipReason::NoMatchingRules,
                    analysis: None,
                });
                continue;
            }

            let rule_ids: Vec<String> = applicable_rules.iter().map(|r| r.id.clone()).collect();
            let cache_hit = {
                let cache = self.cache.lock().await;
                cache.lookup(&file.filename, &file.sha, &rule_ids, |path| {
                    freshness_token(self.deps.workspace_root, path)
                })
            };

            if let Some(violations) = cache_hit {
                let analysis = FileAnalysis {
                    violations,
                    explanation: "CACHED".to_string(),
                    rules: applicable_rules,
                    visited_files: Vec::new(),
                    rejected_violations: None,
                    cost: 0.0,
                };
                hooks.on_update_file(&file.filename, LifecycleEvent::Skipped);
                outcomes.push(FileOutcome::Skipped {
                    filename: file.filename,
                    reason: SkipReason::Cached,
                    analysis: Some(analysis),
                });
                continue;
            }

            queue.push_back(PendingReview {
                file,
                applicable_rules,
                rule_ids,
            });
        }

        let reviewed = self.run_reviews(queue, hooks).await;
        outcomes.extend(reviewed);

        if self.cancel.is_cancelled() {
            hooks.on_abort();
        }
        hooks.on_complete(&outcomes);
        outcomes
    }

    async fn run_reviews(
        &self,
        mut queue: VecDeque<PendingReview>,
        hooks: &dyn OrchestratorHooks,
    ) -> Vec<FileOutcome> {
        let cap = self.deps.concurrency.max(1);
        let all_files: Vec<FileChange> = queue.iter().map(|p| p.file.clone()).collect();
        let mut outcomes = Vec::with_capacity(queue.len());

        type ReviewResult = (FileChange, Vec<String>, Result<FileAnalysis, ReviewError>);
        let mut in_flight: FuturesUnordered<BoxFuture<'_, ReviewResult>> = FuturesUnordered::new();

        let dispatch_next = |in_flight: &mut FuturesUnordered<BoxFuture<'_, ReviewResult>>,
                              queue: &mut VecDeque<PendingReview>| {
            if self.cancel.is_cancelled() {
                return false;
            }
            let Some(pending) = queue.pop_front() else {
                return false;
            };
            hooks.on_update_file(&pending.file.filename, LifecycleEvent::Processing);
            in_flight.push(Box::pin(self.run_one(pending, &all_files)));
            true
        };

        while in_flight.len() < cap {
            if !dispatch_next(&mut in_flight, &mut queue) {
                break;
            }
        }

        while let Some((file, rule_ids, result)) = in_flight.next().await {
            let filename = file.filename.clone();
            let outcome = match result {
                Ok(analysis) => {
                    self.record_cache_entry(&file, &rule_ids, &analysis).await;
                    hooks.on_update_file(&filename, LifecycleEvent::Completed);
                    FileOutcome::Completed { filename, analysis }
                }
                Err(ReviewError::Aborted) => {
                    hooks.on_update_file(&filename, LifecycleEvent::Skipped);
                    FileOutcome::Skipped {
                        filename,
                        reason: SkipReason::Error("aborted".to_string()),
                        analysis: None,
                    }
                }
                Err(err) => {
                    hooks.on_update_file(&filename, LifecycleEvent::Skipped);
                    FileOutcome::Skipped {
                        filename,
                        reason: SkipReason::Error(err.to_string()),
                        analysis: None,
                    }
                }
            };
            outcomes.push(outcome);

            dispatch_next(&mut in_flight, &mut queue);
        }

        outcomes
    }

    async fn run_one(
        &self,
        pending: PendingReview,
        all_files: &[FileChange],
    ) -> (FileChange, Vec<String>, Result<FileAnalysis, ReviewError>) {
        let review = review_file(
            &pending.file,
            all_files,
            pending.applicable_rules,
            ReviewLoopDeps {
                client: self.deps.client,
                review_model: self.deps.review_model,
                validator_model: self.deps.validator_model,
                workspace_root: self.deps.workspace_root,
                ripgrep_binary: self.deps.ripgrep_binary,
            },
        );

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReviewError::Aborted),
            result = review => result,
        };

        (pending.file, pending.rule_ids, result)
    }

    /// Record a completed review and flush. Caching is best-effort: a
    /// failure here degrades the next run's cache hit rate, never this
    /// run's result.
    async fn record_cache_entry(&self, file: &FileChange, rule_ids: &[String], analysis: &FileAnalysis) {
        let visited_files = analysis
            .visited_files
            .iter()
            .filter_map(|filename| {
                freshness_token(self.deps.workspace_root, filename).map(|token| VisitedFileRecord {
                    filename: filename.clone(),
                    freshness_token: token,
                })
            })
            .collect();

        let mut cache = self.cache.lock().await;
        cache.record(CacheEntry {
            filename: file.filename.clone(),
            file_sha: file.sha.clone(),
            rule_ids: rule_ids.to_vec(),
            violations: analysis.violations.clone(),
            visited_files,
            cost: analysis.cost,
        });
        if let Err(err) = cache.flush() {
            tracing::warn!(error = %err, filename = %file.filename, "failed to flush review cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_core::ChangeStatus;

    #[test]
    fn cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_once_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[test]
    fn file_outcome_filename_accessor() {
        let file = FileChange::new("a.rs", ChangeStatus::Modified, None, 0, 0);
        let outcome = FileOutcome::Skipped {
            filename: file.filename.clone(),
            reason: SkipReason::NoMatchingRules,
            analysis: None,
        };
        assert_eq!(outcome.filename(), "a.rs");
    }

    #[tokio::test]
    async fn no_matching_rules_skips_without_cache_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let cache = Arc::new(Mutex::new(ReviewCache::open(dir.path(), workspace.path()).unwrap()));

        let client = LlmClient::new("https://example.invalid", "test-key").unwrap();
        let deps = OrchestratorDeps {
            client: &client,
            review_model: "gpt-test",
            validator_model: "gpt-test",
            workspace_root: workspace.path(),
            ripgrep_binary: "rg",
            concurrency: 4,
        };
        let orchestrator = Orchestrator::new(deps, cache, CancellationToken::new());

        let files = vec![FileChange::new(
            "unmatched.rs",
            ChangeStatus::Modified,
            Some("patch".to_string()),
            1,
            0,
        )];
        let outcomes = orchestrator.run(files, &[], &NoopHooks).await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0],
            FileOutcome::Skipped {
                reason: SkipReason::NoMatchingRules,
                ..
            }
        ));
    }
}
