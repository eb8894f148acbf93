use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn never_abort() -> impl std::future::Future<Output = ()> {
    std::future::pending()
}

#[tokio::test]
async fn test_ready_on_first_check_returns_immediately() {
    let config = TransportReadyConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    };
    let result =
        wait_for_transport_ready("rpc", || async { Ok(true) }, config, never_abort()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_ready_after_a_few_polls() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let config = TransportReadyConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    };
    let a = attempts.clone();
    let result = wait_for_transport_ready(
        "ws",
        move || {
            let a = a.clone();
            async move { Ok(a.fetch_add(1, Ordering::SeqCst) >= 2) }
        },
        config,
        never_abort(),
    )
    .await;
    assert!(result.is_ok());
    assert!(attempts.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_check_error_is_fatal() {
    let config = TransportReadyConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    };
    let result = wait_for_transport_ready(
        "rpc",
        || async { Err(anyhow::anyhow!("connection refused")) },
        config,
        never_abort(),
    )
    .await;
    assert!(matches!(result, Err(TransportReadyError::CheckFailed(_))));
}

#[tokio::test]
async fn test_timeout_elapses() {
    let config = TransportReadyConfig {
        timeout: Duration::from_millis(20),
        log_after: Duration::from_millis(5),
        log_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
    };
    let result =
        wait_for_transport_ready("rpc", || async { Ok(false) }, config, never_abort()).await;
    assert!(matches!(result, Err(TransportReadyError::Timeout(_))));
}

#[tokio::test]
async fn test_abort_short_circuits_wait() {
    let config = TransportReadyConfig {
        timeout: Duration::from_secs(60),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let result = wait_for_transport_ready(
        "rpc",
        || async { Ok(false) },
        config,
        async { tokio::time::sleep(Duration::from_millis(15)).await },
    )
    .await;
    assert!(matches!(result, Err(TransportReadyError::Aborted)));
}
