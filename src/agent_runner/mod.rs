/// Wraps the `runAgent` execution primitive with model-fallback, thinking-level
/// resolution and timeout/abort handling. The concrete LLM call is out of
/// scope here — `AgentExecutor` is the seam a provider implementation plugs
/// into, the same way `providers::base::LLMProvider` was the teacher's seam.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use crate::config::schema::ThinkingLevel;
use crate::errors::SwitchboardError;
use crate::session::manager::UsageStats;
use crate::session::store::SessionStore;

/// Cooperative cancellation handle for one agent run. Cloning shares the
/// same underlying signal; `abort()` is visible to every clone regardless
/// of whether it was waiting at the time, since it rides a `watch` channel
/// rather than a one-shot notify.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `abort()` has been called on this signal or any clone of it.
    async fn aborted(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully-resolved request to run one agent turn.
#[derive(Debug, Clone)]
pub struct AgentRunRequest {
    pub session_key: String,
    pub agent_id: String,
    pub prompt: String,
    pub model: String,
    pub thinking_level: ThinkingLevel,
    pub timeout: Duration,
    pub abort: AbortSignal,
}

/// Output of a completed agent turn.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub content: String,
    pub usage: UsageStats,
    pub model: String,
    pub duration: Duration,
}

/// Execution boundary for a single LLM-backed agent run. Implementations own
/// the provider HTTP call; this crate only orchestrates fallback and timeout.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, req: &AgentRunRequest) -> Result<AgentRunResult, SwitchboardError>;

    /// The model this executor serves, used for fallback-chain resolution.
    fn model(&self) -> &str;
}

/// Downgrade a thinking level the fallback model cannot service.
/// `xhigh`/`max` requests fall back to `standard` once the primary provider's
/// extended-thinking support is exhausted.
pub fn downgrade_thinking_level(level: ThinkingLevel, supports_extended: bool) -> ThinkingLevel {
    if supports_extended {
        level
    } else {
        ThinkingLevel::Standard
    }
}

/// Resolve the effective model for a run, given precedence:
/// job override -> session override -> agent default.
///
/// A whitespace-only override is treated as unset and falls through to the
/// next level, rather than collapsing straight to the agent default.
pub fn resolve_model(
    job_override: Option<&str>,
    session_override: Option<&str>,
    agent_default: &str,
) -> String {
    for candidate in [job_override, session_override] {
        if let Some(trimmed) = candidate.map(str::trim)
            && !trimmed.is_empty()
        {
            return trimmed.to_string();
        }
    }
    agent_default.trim().to_string()
}

/// Tries an ordered chain of executors, falling back to the next on a
/// retryable failure. Generalizes the teacher's two-provider
/// `FallbackProvider` to an arbitrary-length chain driven by
/// `AgentDefaults::fallback_models`.
pub struct FallbackChain {
    executors: Vec<Arc<dyn AgentExecutor>>,
}

impl FallbackChain {
    pub fn new(executors: Vec<Arc<dyn AgentExecutor>>) -> Self {
        Self { executors }
    }

    /// Run the chain honoring `req.timeout` and `req.abort`. An abort raised
    /// before an attempt starts, or while it is in flight, cancels that
    /// attempt and does not fall through to the next executor — cancellation
    /// is caller intent, not a retryable failure.
    pub async fn run(&self, req: &AgentRunRequest) -> Result<AgentRunResult, SwitchboardError> {
        if req.abort.is_aborted() {
            return Err(SwitchboardError::AgentRun("run aborted".into()));
        }

        let mut last_err = None;
        for (idx, executor) in self.executors.iter().enumerate() {
            let attempt = async {
                tokio::select! {
                    biased;
                    () = req.abort.aborted() => Err(SwitchboardError::AgentRun("run aborted".into())),
                    result = executor.run(req) => result,
                }
            };

            let outcome = if req.timeout.is_zero() {
                attempt.await
            } else {
                match tokio::time::timeout(req.timeout, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SwitchboardError::Provider {
                        message: format!("run timed out after {:?}", req.timeout),
                        retryable: true,
                    }),
                }
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && idx + 1 < self.executors.len() => {
                    warn!(
                        "agent executor {} failed ({}), falling back to next in chain",
                        executor.model(),
                        e
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SwitchboardError::AgentRun("no executors configured".into())))
    }

    /// Run the chain and, on success, atomically merge the run's usage into
    /// the session's running totals (input/output/cacheRead/cacheWrite `+=`,
    /// total re-derived by `UsageStats::merge`).
    pub async fn run_and_record(
        &self,
        req: &AgentRunRequest,
        sessions: &dyn SessionStore,
    ) -> Result<AgentRunResult, SwitchboardError> {
        let result = self.run(req).await?;
        if let Err(e) = merge_run_usage(sessions, &req.session_key, &result.usage).await {
            warn!("failed to merge run usage into session {}: {e:?}", req.session_key);
        }
        Ok(result)
    }
}

/// Merge a completed run's usage into the session's running totals under
/// the store's own atomic save, the way `Session::save` already does for
/// every other mutation.
async fn merge_run_usage(
    sessions: &dyn SessionStore,
    session_key: &str,
    usage: &UsageStats,
) -> Result<()> {
    let mut session = sessions.get_or_create(session_key).await?;
    session.usage.merge(usage);
    sessions.save(&session).await
}
