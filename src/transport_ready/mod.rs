/// Bounded-wait startup probe that blocks a monitor loop until a channel
/// transport (RPC endpoint, WebSocket) is reachable, logging a status
/// notice on a slower cadence once the wait drags on.
///
/// Grounded on the poll-loop-with-periodic-log shape of the heartbeat
/// service: sleep, check, repeat, but cooperatively cancellable and
/// reporting progress rather than acting on a fixed interval forever.
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct TransportReadyConfig {
    pub timeout: Duration,
    pub log_after: Duration,
    pub log_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for TransportReadyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            log_after: Duration::from_secs(5),
            log_interval: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportReadyError {
    #[error("transport not ready after {0:?}")]
    Timeout(Duration),
    #[error("transport-ready wait aborted")]
    Aborted,
    #[error("transport check failed: {0}")]
    CheckFailed(#[from] anyhow::Error),
}

/// Poll `check` until it resolves to `Ok(true)` (ready), `Ok(false)` (not
/// yet ready, keep polling), or `Err` (fatal, stop immediately). Returns
/// once ready, once `config.timeout` elapses, or once `abort` resolves.
pub async fn wait_for_transport_ready<F, Fut>(
    label: &str,
    mut check: F,
    config: TransportReadyConfig,
    abort: impl Future<Output = ()>,
) -> Result<(), TransportReadyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    tokio::pin!(abort);
    let start = Instant::now();
    let mut last_log = start;
    let mut logged_once = false;

    loop {
        if check().await? {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(TransportReadyError::Timeout(elapsed));
        }
        if elapsed >= config.log_after
            && (!logged_once || last_log.elapsed() >= config.log_interval)
        {
            info!(
                "waiting for {} transport to become ready ({:?} elapsed)",
                label, elapsed
            );
            last_log = Instant::now();
            logged_once = true;
        }

        tokio::select! {
            () = tokio::time::sleep(config.poll_interval) => {}
            () = &mut abort => return Err(TransportReadyError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests;
