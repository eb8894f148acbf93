use super::*;

#[tokio::test]
async fn test_add_and_list_subagent_runs_for_requester() {
    let registry = SubagentRegistry::new();
    registry
        .add_subagent_run("run-1", "req-session", "child-session", "do the thing")
        .await;
    let runs = registry.list_subagent_runs_for_requester("req-session").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-1");
    assert_eq!(runs[0].status, RunStatus::Running);
}

#[tokio::test]
async fn test_list_for_unknown_requester_is_empty() {
    let registry = SubagentRegistry::new();
    let runs = registry.list_subagent_runs_for_requester("nobody").await;
    assert!(runs.is_empty());
}

#[tokio::test]
async fn test_count_active_descendant_runs_counts_running_only() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry.add_subagent_run("run-2", "req", "child-2", "b").await;
    registry.mark_subagent_run_finished("run-1", RunStatus::Ok).await;
    assert_eq!(registry.count_active_descendant_runs("req").await, 1);
}

#[tokio::test]
async fn test_count_active_descendant_runs_includes_grandchildren() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry
        .add_subagent_run("run-2", "child-1", "grandchild-1", "b")
        .await;
    assert_eq!(registry.count_active_descendant_runs("req").await, 2);
}

#[tokio::test]
async fn test_kill_all_for_requester_terminates_direct_children() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry.add_subagent_run("run-2", "req", "child-2", "b").await;
    let killed = registry.kill_all_for_requester("req").await;
    assert_eq!(killed.len(), 2);
    let runs = registry.list_subagent_runs_for_requester("req").await;
    assert!(runs.iter().all(|r| r.status == RunStatus::Terminated));
}

#[tokio::test]
async fn test_kill_all_for_requester_cascades_through_ended_parent() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry
        .add_subagent_run("run-2", "child-1", "grandchild-1", "b")
        .await;
    // The parent run ends on its own (e.g. it already replied) before the
    // requester's kill-all cascade runs; its live descendant must still be
    // reached and terminated.
    registry.mark_subagent_run_finished("run-1", RunStatus::Ok).await;

    let killed = registry.kill_all_for_requester("req").await;
    assert_eq!(killed, vec!["run-2".to_string()]);

    let grandchild_runs = registry
        .list_subagent_runs_for_requester("child-1")
        .await;
    assert_eq!(grandchild_runs[0].status, RunStatus::Terminated);
}

#[tokio::test]
async fn test_kill_all_for_requester_skips_already_finished_runs() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry.mark_subagent_run_finished("run-1", RunStatus::Error).await;
    let killed = registry.kill_all_for_requester("req").await;
    assert!(killed.is_empty());
}

#[tokio::test]
async fn test_mark_subagent_run_terminated_sets_status_and_ended_at() {
    let registry = SubagentRegistry::new();
    registry.add_subagent_run("run-1", "req", "child-1", "a").await;
    registry
        .mark_subagent_run_terminated("run-1", "requester session closed")
        .await;
    let runs = registry.list_subagent_runs_for_requester("req").await;
    assert_eq!(runs[0].status, RunStatus::Terminated);
    assert!(runs[0].ended_at.is_some());
}
