/// Coalesces restart requests into a single, cooldown-spaced process
/// restart, deferred until pending work drains (or a max wait elapses),
/// and executed through the platform service supervisor.
///
/// Grounded on the `running`/`Mutex<bool>` singleton guard the teacher's
/// `CronService`/`HeartbeatService` use to ensure only one scheduling loop
/// runs at a time, generalized here into a token counter so a restart
/// in-flight coalesces any request that arrives behind it, and spaced by
/// a cooldown the way `TaskTracker::spawn` replaces (rather than stacks)
/// a same-keyed background task.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

pub const RESTART_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestartRequest {
    pub delay: Duration,
    pub reason: String,
    pub audit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRestart {
    pub token: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorMethod {
    Launchctl,
    Systemd,
}

#[derive(Debug, Clone)]
pub struct RestartAttempt {
    pub ok: bool,
    pub method: SupervisorMethod,
    pub detail: String,
    pub tried: Vec<String>,
}

struct State {
    in_flight: bool,
    last_restart_at: Option<Instant>,
    emitted: u64,
    consumed: u64,
}

/// Single process-wide restart coordinator. External (unsolicited) SIGUSR1
/// handling must only call into this through `allow_external_signal`.
pub struct RestartController {
    state: Arc<Mutex<State>>,
    external_signal_allowed: bool,
    launchd_label: Option<String>,
    systemd_unit: Option<String>,
}

impl RestartController {
    pub fn new(
        external_signal_allowed: bool,
        launchd_label: Option<String>,
        systemd_unit: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                in_flight: false,
                last_restart_at: None,
                emitted: 0,
                consumed: 0,
            })),
            external_signal_allowed,
            launchd_label,
            systemd_unit,
        }
    }

    pub fn external_signal_allowed(&self) -> bool {
        self.external_signal_allowed
    }

    /// Request a restart. Returns `None` if one is already in-flight (the
    /// request is coalesced into the pending one rather than queued).
    pub async fn schedule_restart(&self, req: RestartRequest) -> Option<ScheduledRestart> {
        let mut state = self.state.lock().await;
        if state.in_flight {
            info!(
                "restart already in-flight, coalescing request: {}",
                req.reason
            );
            return None;
        }
        if let Some(last) = state.last_restart_at {
            let elapsed = last.elapsed();
            if elapsed < RESTART_COOLDOWN {
                let wait = RESTART_COOLDOWN - elapsed;
                warn!("restart requested within cooldown window, waiting {:?} first", wait);
                drop(state);
                tokio::time::sleep(wait).await;
                state = self.state.lock().await;
            }
        }
        state.in_flight = true;
        state.emitted += 1;
        let token = state.emitted;
        drop(state);

        if let Some(audit) = &req.audit {
            info!("restart audit: {} (reason: {})", audit, req.reason);
        }
        if !req.delay.is_zero() {
            tokio::time::sleep(req.delay).await;
        }

        Some(ScheduledRestart {
            token,
            reason: req.reason,
        })
    }

    /// Wait for `get_pending_count` to drain to zero, or `max_wait`,
    /// whichever comes first, then execute the platform restart and mark
    /// the token consumed.
    pub async fn execute<F>(&self, scheduled: ScheduledRestart, get_pending_count: F, max_wait: Duration)
    where
        F: Fn() -> usize,
    {
        let deadline = Instant::now() + max_wait;
        loop {
            if get_pending_count() == 0 || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let attempt = self.restart_process();
        if attempt.ok {
            info!("restart executed via {:?}: {}", attempt.method, attempt.detail);
        } else {
            warn!("restart attempt failed via {:?}: {}", attempt.method, attempt.detail);
        }

        let mut state = self.state.lock().await;
        state.in_flight = false;
        state.last_restart_at = Some(Instant::now());
        state.consumed = scheduled.token;
    }

    #[cfg(target_os = "macos")]
    fn restart_process(&self) -> RestartAttempt {
        let Some(label) = &self.launchd_label else {
            return RestartAttempt {
                ok: false,
                method: SupervisorMethod::Launchctl,
                detail: "no launchd label configured".to_string(),
                tried: vec![],
            };
        };
        let uid = unsafe { libc::getuid() };
        let target = format!("gui/{}/{}", uid, label);
        let cmd = format!("launchctl kickstart -k {}", target);
        let result = crate::utils::subprocess::scrubbed_std_command("launchctl")
            .args(["kickstart", "-k", &target])
            .status();
        match result {
            Ok(status) if status.success() => RestartAttempt {
                ok: true,
                method: SupervisorMethod::Launchctl,
                detail: target,
                tried: vec![cmd],
            },
            Ok(status) => RestartAttempt {
                ok: false,
                method: SupervisorMethod::Launchctl,
                detail: format!("exit status: {}", status),
                tried: vec![cmd],
            },
            Err(e) => RestartAttempt {
                ok: false,
                method: SupervisorMethod::Launchctl,
                detail: e.to_string(),
                tried: vec![cmd],
            },
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn restart_process(&self) -> RestartAttempt {
        let Some(unit) = &self.systemd_unit else {
            return RestartAttempt {
                ok: false,
                method: SupervisorMethod::Systemd,
                detail: "no systemd unit configured".to_string(),
                tried: vec![],
            };
        };
        let cmd = format!("systemctl --user restart {}", unit);
        let result = crate::utils::subprocess::scrubbed_std_command("systemctl")
            .args(["--user", "restart", unit])
            .status();
        match result {
            Ok(status) if status.success() => RestartAttempt {
                ok: true,
                method: SupervisorMethod::Systemd,
                detail: unit.clone(),
                tried: vec![cmd],
            },
            Ok(status) => RestartAttempt {
                ok: false,
                method: SupervisorMethod::Systemd,
                detail: format!("exit status: {}", status),
                tried: vec![cmd],
            },
            Err(e) => RestartAttempt {
                ok: false,
                method: SupervisorMethod::Systemd,
                detail: e.to_string(),
                tried: vec![cmd],
            },
        }
    }
}

/// Process-wide counter a SIGUSR1 handler checks before acting, so external
/// restart signals are dropped unless explicitly allowed.
pub static EXTERNAL_RESTART_TOKEN: AtomicU64 = AtomicU64::new(0);

pub fn note_external_signal_received() -> u64 {
    EXTERNAL_RESTART_TOKEN.fetch_add(1, Ordering::SeqCst) + 1
}

#[cfg(test)]
mod tests;
