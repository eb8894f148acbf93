use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use super::{CronCommands, PairingCommands};
use crate::bus::OutboundMessage;
use crate::channels::manager::ChannelManager;
use crate::config::load_config;
use crate::cron::run_log;
use crate::cron::service::CronService;
use crate::cron::types::{CronJob, CronJobState, CronPayload, CronSchedule, UpdateJobParams};
use crate::pairing::PairingStore;
use crate::session::manager::{run_session_key, SessionManager};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn format_next_run(ms: Option<i64>) -> String {
    ms.map_or_else(
        || "never".to_string(),
        |ms| {
            chrono::DateTime::from_timestamp(ms / 1000, 0).map_or_else(
                || "invalid timestamp".to_string(),
                |dt| format!("{}", dt.format("%Y-%m-%d %H:%M:%S")),
            )
        },
    )
}

fn cron_service() -> Result<CronService> {
    let store_path = crate::utils::get_switchboard_home()?
        .join("cron")
        .join("jobs.json");
    Ok(CronService::new(store_path))
}

#[allow(clippy::too_many_lines)]
pub(super) async fn cron_command(cmd: CronCommands) -> Result<()> {
    let cron = cron_service()?;

    match cmd {
        CronCommands::List { all } => {
            let jobs = cron.list_jobs(all).await?;
            if jobs.is_empty() {
                println!("No cron jobs found.");
            } else {
                println!("Cron jobs:");
                for job in jobs {
                    let status = if job.enabled { "enabled" } else { "disabled" };
                    println!(
                        "  [{}] {} - {} (next: {})",
                        job.id,
                        job.name,
                        status,
                        format_next_run(job.state.next_run_at_ms)
                    );
                }
            }
        }
        CronCommands::Add {
            name,
            message,
            every,
            cron: cron_expr,
            tz,
            at,
            channel,
            to,
        } => {
            use crate::cron::types::CronTarget;

            let targets = if let (Some(ch), Some(to_val)) = (channel, to) {
                vec![CronTarget {
                    channel: ch,
                    to: to_val,
                }]
            } else {
                Vec::new()
            };

            let schedule = resolve_schedule(every, cron_expr, tz, at)?
                .context("must specify --every, --cron, or --at")?;

            let now = now_ms();
            let job = CronJob {
                id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
                name,
                enabled: true,
                schedule,
                payload: CronPayload {
                    kind: "agent_turn".to_string(),
                    message,
                    agent_echo: true,
                    targets,
                },
                session_target: Default::default(),
                wake_mode: Default::default(),
                delivery: Default::default(),
                state: CronJobState::default(),
                created_at_ms: now,
                updated_at_ms: now,
                delete_after_run: false,
                expires_at_ms: None,
                max_runs: None,
                cooldown_secs: None,
                max_concurrent: None,
            };

            cron.add_job(job).await?;
            println!("Cron job added successfully.");
        }
        CronCommands::Update {
            id,
            name,
            message,
            every,
            cron: cron_expr,
            tz,
            at,
        } => {
            let schedule = resolve_schedule(every, cron_expr, tz, at)?;

            match cron
                .update_job(
                    &id,
                    UpdateJobParams {
                        name,
                        message,
                        schedule,
                        ..Default::default()
                    },
                )
                .await?
            {
                Some(job) => println!("Updated job: {} ({})", job.name, job.id),
                None => println!("Cron job {id} not found."),
            }
        }
        CronCommands::Remove { id } => match cron.remove_job(&id).await? {
            Some(job) => println!("Removed cron job: {} ({})", job.name, job.id),
            None => println!("Cron job {id} not found."),
        },
        CronCommands::Enable { id } => match cron.enable_job(&id, true).await? {
            Some(job) => println!("Job {} ({}) enabled", job.name, job.id),
            None => println!("Cron job {id} not found."),
        },
        CronCommands::Disable { id } => match cron.enable_job(&id, false).await? {
            Some(job) => println!("Job {} ({}) disabled", job.name, job.id),
            None => println!("Cron job {id} not found."),
        },
        CronCommands::Status { id } => {
            let jobs = cron.list_jobs(true).await?;
            match jobs.into_iter().find(|j| j.id == id) {
                Some(job) => {
                    println!("Job {} ({})", job.name, job.id);
                    println!("  enabled: {}", job.enabled);
                    println!("  next run: {}", format_next_run(job.state.next_run_at_ms));
                    println!(
                        "  last run: {}",
                        format_next_run(job.state.last_run_at_ms)
                    );
                    println!(
                        "  last status: {}",
                        job.state.last_status.as_deref().unwrap_or("never run")
                    );
                    if let Some(err) = &job.state.last_error {
                        println!("  last error: {err}");
                    }
                    println!("  run count: {}", job.state.run_count);
                }
                None => println!("Cron job {id} not found."),
            }
        }
        CronCommands::Run { id, force } => match cron.run_job(&id, force).await? {
            Some(result) => {
                println!("Job executed successfully.");
                if let Some(output) = result {
                    println!("{output}");
                }
            }
            None => println!("Failed to run job {id} (not found or disabled)."),
        },
        CronCommands::History { id, limit, tools: _ } => {
            let runs_dir = crate::utils::get_switchboard_home()?
                .join("cron")
                .join("runs");
            let entries = run_log::read(&runs_dir, &id, Some(limit))?;
            if entries.is_empty() {
                println!("No run history for {id}.");
            } else {
                for entry in entries {
                    println!(
                        "  {} {} ({}ms){}",
                        format_next_run(Some(entry.ts)),
                        entry.status,
                        entry.duration_ms.unwrap_or(0),
                        entry
                            .error
                            .as_ref()
                            .map(|e| format!(" error: {e}"))
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    Ok(())
}

/// Build a `CronSchedule` from the mutually-exclusive `--every`/`--cron`/`--at`
/// flags. Returns `Ok(None)` when none were given, letting `update` leave the
/// existing schedule untouched.
pub(super) fn resolve_schedule(
    every: Option<u64>,
    cron_expr: Option<String>,
    tz: Option<String>,
    at: Option<String>,
) -> Result<Option<CronSchedule>> {
    if let Some(every_sec) = every {
        Ok(Some(CronSchedule::Every {
            every_ms: Some(every_sec.saturating_mul(1000).min(i64::MAX as u64) as i64),
        }))
    } else if let Some(expr) = cron_expr {
        crate::cron::service::validate_cron_expr(&expr)?;
        let tz = tz.or_else(crate::cron::service::detect_system_timezone);
        Ok(Some(CronSchedule::Cron {
            expr: Some(expr),
            tz,
        }))
    } else if let Some(at_str) = at {
        let dt = chrono::DateTime::parse_from_rfc3339(&at_str)
            .or_else(|_| chrono::DateTime::parse_from_str(&at_str, "%Y-%m-%d %H:%M:%S"))
            .context("invalid date format, use ISO 8601 or YYYY-MM-DD HH:MM:SS")?;
        Ok(Some(CronSchedule::At {
            at_ms: Some(dt.timestamp_millis()),
        }))
    } else {
        Ok(None)
    }
}

pub(super) async fn pairing_command(cmd: PairingCommands) -> Result<()> {
    let mut store = PairingStore::new()?;
    let config = load_config(None)?;
    store.set_ttl_secs(config.pairing.code_ttl_secs);

    match cmd {
        PairingCommands::List => {
            let pending = store.list_pending();
            if pending.is_empty() {
                println!("No pending pairing requests.");
            } else {
                println!("Pending pairing requests:");
                for req in pending {
                    println!("  {} / {} - code {}", req.channel, req.sender_id, req.code);
                }
            }
            println!("{} sender(s) paired.", store.paired_count());
        }
        PairingCommands::Approve { code } => match store.approve(&code)? {
            Some((channel, sender_id)) => {
                println!("Paired {sender_id} on {channel}.");
            }
            None => println!("No matching pending request for code {code}."),
        },
        PairingCommands::Revoke { channel, sender_id } => {
            if store.revoke(&channel, &sender_id)? {
                println!("Revoked {sender_id} on {channel}.");
            } else {
                println!("{sender_id} was not paired on {channel}.");
            }
        }
    }

    Ok(())
}

pub(super) async fn status_command() -> Result<()> {
    let config = load_config(None)?;
    config.validate()?;

    let enabled: Vec<&str> = config
        .channels
        .channels
        .iter()
        .filter(|(_, c)| c.enabled)
        .map(|(name, _)| name.as_str())
        .collect();
    println!(
        "channels: {} enabled ({})",
        enabled.len(),
        if enabled.is_empty() {
            "none".to_string()
        } else {
            enabled.join(", ")
        }
    );

    let cron = cron_service()?;
    let jobs = cron.list_jobs(true).await?;
    let now = now_ms();
    let enabled_jobs = jobs.iter().filter(|j| j.enabled).count();
    let due_now = jobs
        .iter()
        .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|ms| ms <= now))
        .count();
    println!(
        "cron: {} job(s), {} enabled, {} due now",
        jobs.len(),
        enabled_jobs,
        due_now
    );

    let pairing = PairingStore::new()?;
    println!(
        "pairing: {} pending request(s), {} paired sender(s)",
        pairing.list_pending().len(),
        pairing.paired_count()
    );

    // Scheduled restarts live only in the running gateway process's memory,
    // so a separate `status` invocation can't observe them.
    println!("restarts: unavailable outside a running gateway process");

    Ok(())
}

/// Deliver one fired cron job: send its message to every configured target,
/// then mirror a record of the firing into the job's session so history
/// reflects it. Returns the delivered text for the run log summary.
pub(super) async fn deliver_cron_job(
    channel_manager: &ChannelManager,
    sessions: &SessionManager,
    job: &CronJob,
) -> anyhow::Result<Option<String>> {
    use crate::cron::types::{DeliveryMode, SessionTarget};

    let base_key = format!("cron:{}", job.id);
    let session_key = match job.session_target {
        SessionTarget::Isolated => run_session_key(&base_key),
        SessionTarget::Main => base_key,
    };
    let mut session = sessions.get_or_create(&session_key).await?;
    session.add_message("system".to_string(), job.payload.message.clone(), HashMap::new());
    sessions.save(&session).await?;

    let text = job.payload.message.clone();

    for target in &job.payload.targets {
        let msg = OutboundMessage {
            channel: target.channel.clone(),
            chat_id: target.to.clone(),
            content: text.clone(),
            reply_to: None,
            thread_id: None,
            account_id: None,
            media: vec![],
            metadata: HashMap::new(),
        };
        if let Err(e) = channel_manager.send(&msg).await {
            tracing::warn!(
                "cron job {} failed to deliver to {}/{}: {e:?}",
                job.id,
                target.channel,
                target.to
            );
            if !job.delivery.best_effort {
                return Err(e);
            }
        }
    }

    match job.delivery.mode {
        DeliveryMode::None => {}
        DeliveryMode::Announce | DeliveryMode::Direct => {
            if let (Some(channel), Some(to)) = (&job.delivery.channel, &job.delivery.to) {
                let msg = OutboundMessage {
                    channel: channel.clone(),
                    chat_id: to.clone(),
                    content: text.clone(),
                    reply_to: None,
                    thread_id: None,
                    account_id: None,
                    media: vec![],
                    metadata: HashMap::new(),
                };
                if let Err(e) = channel_manager.send(&msg).await {
                    tracing::warn!("cron job {} delivery to {channel}/{to} failed: {e:?}", job.id);
                    if !job.delivery.best_effort {
                        return Err(e);
                    }
                }
            }
        }
    }

    Ok(Some(text))
}

