use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn req(reason: &str) -> RestartRequest {
    RestartRequest {
        delay: Duration::from_millis(0),
        reason: reason.to_string(),
        audit: None,
    }
}

#[tokio::test]
async fn test_schedule_restart_succeeds_when_idle() {
    let controller = RestartController::new(false, None, None);
    let scheduled = controller.schedule_restart(req("deploy")).await;
    assert!(scheduled.is_some());
    assert_eq!(scheduled.unwrap().token, 1);
}

#[tokio::test]
async fn test_second_request_coalesces_while_in_flight() {
    let controller = RestartController::new(false, None, None);
    let first = controller.schedule_restart(req("first")).await;
    assert!(first.is_some());
    // Second request arrives before `execute` clears in_flight.
    let second = controller.schedule_restart(req("second")).await;
    assert!(second.is_none());
}

#[tokio::test]
async fn test_execute_waits_for_pending_to_drain() {
    let controller = RestartController::new(false, None, None);
    let scheduled = controller.schedule_restart(req("deploy")).await.unwrap();
    let pending = std::sync::Arc::new(AtomicUsize::new(2));
    let p = pending.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        p.store(0, Ordering::SeqCst);
    });
    let start = Instant::now();
    controller
        .execute(scheduled, move || pending.load(Ordering::SeqCst), Duration::from_secs(5))
        .await;
    assert!(start.elapsed() >= Duration::from_millis(40));
    handle.await.unwrap();
}

#[tokio::test]
async fn test_execute_gives_up_after_max_wait() {
    let controller = RestartController::new(false, None, None);
    let scheduled = controller.schedule_restart(req("deploy")).await.unwrap();
    let start = Instant::now();
    controller
        .execute(scheduled, || 99, Duration::from_millis(50))
        .await;
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_external_signal_disallowed_by_default() {
    let controller = RestartController::new(false, None, None);
    assert!(!controller.external_signal_allowed());
}

#[test]
fn test_note_external_signal_received_increments() {
    let first = note_external_signal_received();
    let second = note_external_signal_received();
    assert_eq!(second, first + 1);
}
