/// Tracks parent->child subagent run relationships and the announce flow
/// that delivers a finished subagent's result back into its requester's
/// session.
///
/// Generalizes the teacher's `agent::subagent::SubagentManager` flat
/// `running_tasks` map into a requester->child edge set, so a "kill all
/// subagents for requester R" request can walk the DAG transitively instead
/// of only touching R's direct children.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

/// The literal token a subagent returns to signal "no reply needed" —
/// the announce flow treats this as a successful, silent completion.
pub const NO_REPLY: &str = "NO_REPLY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Ok,
    Error,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct SubagentRun {
    pub run_id: String,
    pub child_session_key: String,
    pub requester_session_key: String,
    pub task: String,
    pub created_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub status: RunStatus,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<String, SubagentRun>,
    /// requester -> direct child run ids.
    children: HashMap<String, Vec<String>>,
}

/// Thread-safe registry of subagent runs, forming a DAG keyed by
/// `requester_session_key -> run_id`.
#[derive(Clone, Default)]
pub struct SubagentRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SubagentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subagent_run(
        &self,
        run_id: impl Into<String>,
        requester_session_key: impl Into<String>,
        child_session_key: impl Into<String>,
        task: impl Into<String>,
    ) {
        let run_id = run_id.into();
        let requester = requester_session_key.into();
        let run = SubagentRun {
            run_id: run_id.clone(),
            child_session_key: child_session_key.into(),
            requester_session_key: requester.clone(),
            task: task.into(),
            created_at: SystemTime::now(),
            ended_at: None,
            status: RunStatus::Running,
        };
        let mut registry = self.inner.lock().await;
        registry.runs.insert(run_id.clone(), run);
        registry.children.entry(requester).or_default().push(run_id);
    }

    pub async fn list_subagent_runs_for_requester(&self, requester: &str) -> Vec<SubagentRun> {
        let registry = self.inner.lock().await;
        registry
            .children
            .get(requester)
            .into_iter()
            .flatten()
            .filter_map(|id| registry.runs.get(id).cloned())
            .collect()
    }

    pub async fn count_active_descendant_runs(&self, requester: &str) -> usize {
        let registry = self.inner.lock().await;
        Self::collect_descendants(&registry, requester)
            .iter()
            .filter(|id| {
                registry
                    .runs
                    .get(*id)
                    .is_some_and(|r| r.status == RunStatus::Running)
            })
            .count()
    }

    pub async fn mark_subagent_run_terminated(&self, run_id: &str, reason: &str) {
        let mut registry = self.inner.lock().await;
        if let Some(run) = registry.runs.get_mut(run_id) {
            tracing::debug!("subagent run {} terminated: {}", run_id, reason);
            run.status = RunStatus::Terminated;
            run.ended_at = Some(SystemTime::now());
        }
    }

    pub async fn mark_subagent_run_finished(&self, run_id: &str, status: RunStatus) {
        let mut registry = self.inner.lock().await;
        if let Some(run) = registry.runs.get_mut(run_id) {
            run.status = status;
            run.ended_at = Some(SystemTime::now());
        }
    }

    /// Walk transitively from `requester` through the requester->child edge
    /// set, terminating every live descendant. An ended parent does not
    /// shield its still-running children from the cascade.
    pub async fn kill_all_for_requester(&self, requester: &str) -> Vec<String> {
        let mut registry = self.inner.lock().await;
        let descendants = Self::collect_descendants(&registry, requester);
        let mut killed = Vec::new();
        for run_id in descendants {
            if let Some(run) = registry.runs.get_mut(&run_id)
                && run.status == RunStatus::Running
            {
                run.status = RunStatus::Terminated;
                run.ended_at = Some(SystemTime::now());
                killed.push(run_id);
            }
        }
        killed
    }

    /// Every run reachable from `requester`, including runs whose parent run
    /// (itself a requester of further children) has already ended.
    fn collect_descendants(registry: &Registry, requester: &str) -> Vec<String> {
        let mut stack = vec![requester.to_string()];
        let mut seen = Vec::new();
        while let Some(node) = stack.pop() {
            if let Some(children) = registry.children.get(&node) {
                for child_run_id in children {
                    seen.push(child_run_id.clone());
                    // A run's own session key can itself be a requester of
                    // grandchildren — descend through it regardless of the
                    // parent run's status.
                    if let Some(child_run) = registry.runs.get(child_run_id) {
                        stack.push(child_run.child_session_key.clone());
                    }
                }
            }
        }
        seen
    }
}

pub mod announce;

#[cfg(test)]
mod tests;
