use super::subcommands::{deliver_cron_job, resolve_schedule};
use crate::channels::manager::ChannelManager;
use crate::cron::types::{
    CronDelivery, CronJob, CronJobState, CronPayload, CronSchedule, CronTarget, DeliveryMode,
    SessionTarget,
};
use crate::session::manager::SessionManager;

fn make_job(targets: Vec<CronTarget>, session_target: SessionTarget, delivery: CronDelivery) -> CronJob {
    CronJob {
        id: "job-1".to_string(),
        name: "Test Job".to_string(),
        enabled: true,
        schedule: CronSchedule::Every {
            every_ms: Some(60_000),
        },
        payload: CronPayload {
            kind: "agent_turn".to_string(),
            message: "hello from cron".to_string(),
            agent_echo: true,
            targets,
        },
        session_target,
        wake_mode: Default::default(),
        delivery,
        state: CronJobState::default(),
        created_at_ms: 0,
        updated_at_ms: 0,
        delete_after_run: false,
        expires_at_ms: None,
        max_runs: None,
        cooldown_secs: None,
        max_concurrent: None,
    }
}

#[test]
fn test_resolve_schedule_every() {
    let schedule = resolve_schedule(Some(30), None, None, None).unwrap().unwrap();
    match schedule {
        CronSchedule::Every { every_ms } => assert_eq!(every_ms, Some(30_000)),
        other => panic!("expected Every, got {other:?}"),
    }
}

#[test]
fn test_resolve_schedule_none_returns_none() {
    assert!(resolve_schedule(None, None, None, None).unwrap().is_none());
}

#[test]
fn test_resolve_schedule_rejects_bad_cron_expr() {
    let result = resolve_schedule(None, Some("not a cron".to_string()), None, None);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_deliver_cron_job_best_effort_swallows_missing_channel() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new(dir.path().to_path_buf()).unwrap();
    let channel_manager = ChannelManager::with_channels(vec![]);

    let job = make_job(
        vec![CronTarget {
            channel: "slack".to_string(),
            to: "C1".to_string(),
        }],
        SessionTarget::Isolated,
        CronDelivery {
            best_effort: true,
            ..Default::default()
        },
    );

    let result = deliver_cron_job(&channel_manager, &sessions, &job).await.unwrap();
    assert_eq!(result.as_deref(), Some("hello from cron"));
}

#[tokio::test]
async fn test_deliver_cron_job_strict_propagates_missing_channel() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new(dir.path().to_path_buf()).unwrap();
    let channel_manager = ChannelManager::with_channels(vec![]);

    let job = make_job(
        vec![CronTarget {
            channel: "slack".to_string(),
            to: "C1".to_string(),
        }],
        SessionTarget::Isolated,
        CronDelivery::default(),
    );

    assert!(deliver_cron_job(&channel_manager, &sessions, &job).await.is_err());
}

#[tokio::test]
async fn test_deliver_cron_job_isolated_session_uses_scratch_key() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new(dir.path().to_path_buf()).unwrap();
    let channel_manager = ChannelManager::with_channels(vec![]);

    let job = make_job(vec![], SessionTarget::Isolated, CronDelivery::default());
    deliver_cron_job(&channel_manager, &sessions, &job).await.unwrap();

    let keys = sessions.list_keys().unwrap();
    assert!(keys.iter().any(|k| k.starts_with("cron:job-1:run:")));
}

#[tokio::test]
async fn test_deliver_cron_job_main_session_uses_stable_key() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new(dir.path().to_path_buf()).unwrap();
    let channel_manager = ChannelManager::with_channels(vec![]);

    let job = make_job(vec![], SessionTarget::Main, CronDelivery::default());
    deliver_cron_job(&channel_manager, &sessions, &job).await.unwrap();

    let keys = sessions.list_keys().unwrap();
    assert!(keys.iter().any(|k| k == "cron:job-1"));
}

#[tokio::test]
async fn test_deliver_cron_job_direct_delivery_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionManager::new(dir.path().to_path_buf()).unwrap();
    let channel_manager = ChannelManager::with_channels(vec![]);

    let job = make_job(
        vec![],
        SessionTarget::Isolated,
        CronDelivery {
            mode: DeliveryMode::Direct,
            channel: Some("slack".to_string()),
            to: Some("C9".to_string()),
            best_effort: true,
        },
    );

    let result = deliver_cron_job(&channel_manager, &sessions, &job).await.unwrap();
    assert_eq!(result.as_deref(), Some("hello from cron"));
}
