mod subcommands;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::channels::manager::ChannelManager;
use crate::config::load_config;
use crate::cron::event_matcher::EventMatcher;
use crate::cron::reaper::{SessionReaper, DEFAULT_RETENTION};
use crate::cron::service::CronService;
use crate::cron::types::CronJob;
use crate::debounce::Debouncer;
use crate::gateway;
use crate::pairing::PairingStore;
use crate::policy::echo_cache::EchoCache;
use crate::policy::{resolve_channel_inbound_decision, Decision};
use crate::reply::{ReplyDispatcher, ReplyPayload};
use crate::restart::RestartController;
use crate::session::init::{init_session, SessionInitContext};
use crate::session::manager::SessionManager;
use crate::subagent::SubagentRegistry;
use crate::transport_ready::{wait_for_transport_ready, TransportReadyConfig};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(800);
const ECHO_CACHE_TTL: Duration = Duration::from_secs(120);
/// How often the event-trigger cron matcher is rebuilt from the job store,
/// so jobs added/edited/disabled after startup take effect without a restart.
const EVENT_MATCHER_REFRESH: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Multi-channel chat-bot gateway")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch and cron engine.
    Gateway {
        /// Echo mode: reply with the inbound text verbatim, bypassing agent
        /// execution entirely. Useful to verify channel wiring.
        #[arg(long)]
        echo: bool,
    },
    /// Manage cron jobs.
    Cron {
        #[command(subcommand)]
        cmd: CronCommands,
    },
    /// Manage sender pairing (authorize new senders to message the bot).
    Pairing {
        #[command(subcommand)]
        cmd: PairingCommands,
    },
    /// Show process health: channels enabled, cron jobs due, pending restarts.
    Status,
}

#[derive(Subcommand)]
pub(crate) enum CronCommands {
    /// List scheduled jobs.
    List {
        #[arg(long, short = 'a')]
        all: bool,
    },
    /// Add a new job.
    Add {
        #[arg(long, short = 'n')]
        name: String,
        #[arg(long, short = 'm')]
        message: String,
        #[arg(long, short = 'e')]
        every: Option<u64>,
        #[arg(long, short = 'c')]
        cron: Option<String>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Update an existing job.
    Update {
        #[arg(long)]
        id: String,
        #[arg(long, short = 'n')]
        name: Option<String>,
        #[arg(long, short = 'm')]
        message: Option<String>,
        #[arg(long, short = 'e')]
        every: Option<u64>,
        #[arg(long, short = 'c')]
        cron: Option<String>,
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Remove a job.
    Remove {
        id: String,
    },
    /// Enable a disabled job.
    Enable {
        id: String,
    },
    /// Disable an enabled job.
    Disable {
        id: String,
    },
    /// Show one job's full state.
    Status {
        id: String,
    },
    /// Run a job immediately.
    Run {
        id: String,
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Show a job's run history.
    History {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Accepted for compatibility; this build's run log carries no
        /// per-tool-call detail since no agent executor runs cron turns.
        #[arg(long)]
        tools: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum PairingCommands {
    /// List pending pairing requests and paired sender counts.
    List,
    /// Approve a pending request by its code.
    Approve { code: String },
    /// Revoke a previously approved sender's access.
    Revoke { channel: String, sender_id: String },
}

/// Process exit codes per the cron CLI/RPC contract: 0 ok, 1 user error, 2 system error.
pub enum ExitCode {
    Ok = 0,
    UserError = 1,
    SystemError = 2,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Gateway { echo } => gateway_command(echo).await,
        Commands::Cron { cmd } => subcommands::cron_command(cmd).await,
        Commands::Pairing { cmd } => subcommands::pairing_command(cmd).await,
        Commands::Status => subcommands::status_command().await,
    };

    if let Err(e) = &result {
        error!("command failed: {e:?}");
        std::process::exit(ExitCode::SystemError as i32);
    }
    result
}

/// Assemble and run the dispatch+cron engine: channels in, policy and
/// debounce, session-backed agent fan-out, cron-driven announce, reply
/// chunking out. Blocks until the process receives a shutdown signal.
async fn gateway_command(echo: bool) -> Result<()> {
    let config = load_config(None)?;
    config.validate()?;

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let sessions = Arc::new(SessionManager::new(workspace)?);
    let subagents = Arc::new(SubagentRegistry::new());

    let mut pairing_store = PairingStore::new()?;
    pairing_store.set_ttl_secs(config.pairing.code_ttl_secs);
    let pairing = Arc::new(Mutex::new(pairing_store));

    let mut bus = MessageBus::default();
    bus.add_known_secrets(&config.collect_secrets());
    let inbound_tx = Arc::new(bus.inbound_tx.clone());
    let outbound_tx = Arc::new(bus.outbound_tx.clone());
    let mut inbound_rx = bus
        .take_inbound_rx()
        .context("inbound receiver already taken")?;
    let mut outbound_rx = bus
        .take_outbound_rx()
        .context("outbound receiver already taken")?;
    let bus = Arc::new(Mutex::new(bus));

    let mut channel_manager = ChannelManager::new(&config, inbound_tx.clone());
    channel_manager.start_all().await?;
    let channel_manager = Arc::new(channel_manager);
    let nodes = channel_manager.enabled_channels().to_vec();
    info!("channels enabled: {}", nodes.join(", "));

    let cron_store_path = crate::utils::get_switchboard_home()?
        .join("cron")
        .join("jobs.json");
    let cron = Arc::new(CronService::new(cron_store_path));
    {
        let channel_manager = channel_manager.clone();
        let sessions = sessions.clone();
        cron.set_on_job(move |job: CronJob| {
            let channel_manager = channel_manager.clone();
            let sessions = sessions.clone();
            Box::pin(async move { subcommands::deliver_cron_job(&channel_manager, &sessions, &job).await })
        })
        .await;
    }
    cron.load_store(true).await?;
    cron.start().await?;

    let event_matcher = Arc::new(Mutex::new(
        EventMatcher::from_jobs(&cron.list_jobs(true).await.unwrap_or_default()),
    ));
    let event_matcher_task = {
        let cron = cron.clone();
        let event_matcher = event_matcher.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EVENT_MATCHER_REFRESH).await;
                match cron.list_jobs(true).await {
                    Ok(jobs) => *event_matcher.lock().await = EventMatcher::from_jobs(&jobs),
                    Err(e) => warn!("failed to refresh event-trigger cron matcher: {e:?}"),
                }
            }
        })
    };

    let reaper = Arc::new(SessionReaper::new(
        sessions.clone() as Arc<dyn crate::session::store::SessionStore>,
        Some(DEFAULT_RETENTION),
    ));
    let _reaper_handle = reaper.spawn_loop();

    let restart = Arc::new(RestartController::new(
        true,
        None,
        if config.restart.service_command.is_empty() {
            None
        } else {
            Some(config.restart.service_command.join(" "))
        },
    ));
    let _ = restart.external_signal_allowed();

    let (gateway_handle, http_state) = gateway::start(
        &config.gateway.host,
        config.gateway.port,
        inbound_tx.clone(),
        Some(outbound_tx.clone()),
        config.gateway.webhooks.clone(),
        sessions.clone(),
        subagents.clone(),
        nodes,
    )
    .await?;

    let probe_host = config.gateway.host.clone();
    let probe_port = config.gateway.port;
    wait_for_transport_ready(
        "gateway http api",
        move || {
            let addr = format!("{probe_host}:{probe_port}");
            async move { Ok(tokio::net::TcpStream::connect(&addr).await.is_ok()) }
        },
        TransportReadyConfig::default(),
        std::future::pending(),
    )
    .await
    .ok();

    let (debounced_tx, mut debounced_rx) = tokio::sync::mpsc::channel::<InboundMessage>(256);
    let debouncer = Arc::new(Debouncer::new(DEBOUNCE_WINDOW, debounced_tx));
    let echo_cache = Arc::new(Mutex::new(EchoCache::new(ECHO_CACHE_TTL)));

    let inbound_task = {
        let debouncer = debouncer.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                debouncer.enqueue(msg).await;
            }
        })
    };

    let dispatch_task = {
        let config = config.clone();
        let sessions = sessions.clone();
        let pairing = pairing.clone();
        let echo_cache = echo_cache.clone();
        let bus = bus.clone();
        let cron = cron.clone();
        let event_matcher = event_matcher.clone();
        tokio::spawn(async move {
            while let Some(event) = debounced_rx.recv().await {
                if let Err(e) = handle_inbound(
                    &config,
                    &sessions,
                    &pairing,
                    &echo_cache,
                    &bus,
                    &cron,
                    &event_matcher,
                    event,
                    echo,
                )
                .await
                {
                    warn!("dispatch error: {e:?}");
                }
            }
        })
    };

    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if gateway::route_response(&http_state, msg.clone()).await {
                continue;
            }
            if let Err(e) = channel_manager.send(&msg).await {
                error!("failed to deliver outbound message to {}: {e:?}", msg.channel);
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, stopping gateway");
    cron.stop().await;
    inbound_task.abort();
    dispatch_task.abort();
    outbound_task.abort();
    event_matcher_task.abort();
    gateway_handle.abort();

    Ok(())
}

/// Resolve one debounced inbound event against channel policy, then either
/// drop it, kick off pairing, fire any matching event-triggered cron jobs,
/// or hand it to the reply pipeline.
#[allow(clippy::too_many_arguments)]
async fn handle_inbound(
    config: &crate::config::Config,
    sessions: &Arc<SessionManager>,
    pairing: &Arc<Mutex<PairingStore>>,
    echo_cache: &Arc<Mutex<EchoCache>>,
    bus: &Arc<Mutex<MessageBus>>,
    cron: &Arc<CronService>,
    event_matcher: &Arc<Mutex<EventMatcher>>,
    event: InboundMessage,
    echo: bool,
) -> Result<()> {
    let Some(chan_config) = config.channels.channels.get(&event.channel) else {
        debug!("inbound event for unconfigured channel {}", event.channel);
        return Ok(());
    };

    let is_paired = pairing.lock().await.is_paired(&event.channel, &event.sender_id);
    let echo_key = format!("{}:{}", event.session_key(), event.message_id);
    let is_echo = {
        let cache = echo_cache.lock().await;
        cache.contains(&echo_key).await || cache.contains(&event.content).await
    };
    let allowlist = |_channel: &str, _sender_id: &str| is_paired;
    let cache_view = |_key: &str| is_echo;
    let decision = resolve_channel_inbound_decision(chan_config, &event, &allowlist, &cache_view);

    match decision {
        Decision::Drop(reason) => {
            debug!("dropping inbound from {}: {}", event.sender_id, reason);
            Ok(())
        }
        Decision::Pairing(sender_id) => {
            let code = {
                let mut guard = pairing.lock().await;
                guard.request_pairing(&event.channel, &sender_id)?
            };
            if let Some(code) = code {
                let msg = OutboundMessage {
                    channel: event.channel.clone(),
                    chat_id: event.chat_id.clone(),
                    content: format!("You're not paired yet. Share this code with an approved user: {code}"),
                    reply_to: Some(event.message_id.clone()),
                    thread_id: event.thread_id.clone(),
                    account_id: None,
                    media: vec![],
                    metadata: std::collections::HashMap::new(),
                };
                bus.lock().await.publish_outbound(msg).await.ok();
            }
            Ok(())
        }
        Decision::Dispatch => {
            let matched = {
                let mut matcher = event_matcher.lock().await;
                if matcher.is_empty() {
                    Vec::new()
                } else {
                    matcher.check_message(&event.content, &event.channel, event.timestamp.timestamp_millis())
                }
            };
            for job in matched {
                let cron = cron.clone();
                let job_id = job.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = cron.run_job(&job_id, true).await {
                        warn!("event-triggered cron job {job_id} failed: {e:?}");
                    }
                });
            }

            dispatch_to_session(sessions, bus, &config.session, chan_config, echo_cache, is_paired, &event, echo).await
        }
    }
}

/// Resolve (or reset/fork) the turn's session, run (or echo) it, and deliver
/// the reply through the shared outbound bus.
#[allow(clippy::too_many_arguments)]
async fn dispatch_to_session(
    sessions: &Arc<SessionManager>,
    bus: &Arc<Mutex<MessageBus>>,
    session_cfg: &crate::config::schema::SessionConfig,
    chan_config: &crate::config::schema::ChannelConfig,
    echo_cache: &Arc<Mutex<EchoCache>>,
    command_authorized: bool,
    event: &InboundMessage,
    echo: bool,
) -> Result<()> {
    let session_key = event.session_key();
    let init_ctx = SessionInitContext {
        session_key: session_key.clone(),
        content: event.content.clone(),
        channel: event.channel.clone(),
        to: event.chat_id.clone(),
        account_id: None,
        thread_id: event.thread_id.clone(),
        chat_type: event.chat_type,
        channel_idle_override_ms: chan_config.reset_idle_ms,
        command_authorized,
        now: chrono::Utc::now(),
        parent_session_key: None,
    };
    let init_result = init_session(&init_ctx, session_cfg, sessions.as_ref(), None).await?;
    let mut session = init_result.session;
    let turn_content = init_result.content_after_trigger;

    if turn_content.trim().is_empty() {
        // The whole message was consumed by a reset trigger; nothing left to
        // echo or hand to an agent this turn.
        return Ok(());
    }

    session.add_message("user".to_string(), turn_content.clone(), std::collections::HashMap::new());

    let reply_text = if echo {
        turn_content.clone()
    } else {
        // No concrete AgentExecutor is wired in this build; without one the
        // fallback chain always errs. Surface that plainly rather than
        // silently dropping the turn.
        warn!("no agent executor configured, dropping turn for {session_key}");
        return Ok(());
    };

    session.add_message("assistant".to_string(), reply_text.clone(), std::collections::HashMap::new());
    sessions.save(&session).await?;

    let chunk_limit = crate::reply::resolve_text_chunk_limit(chan_config.chunk_limit, session_cfg.default_chunk_limit);
    let mut dispatcher = ReplyDispatcher::new(
        bus.as_ref(),
        event.channel.clone(),
        event.chat_id.clone(),
        Some(event.message_id.clone()),
        chan_config.threading_mode,
        chunk_limit,
    );
    dispatcher
        .deliver(ReplyPayload {
            text: Some(reply_text.clone()),
            media: vec![],
            reply_to_id: None,
            reply_to_current: true,
            is_reasoning: false,
        })
        .await?;

    echo_cache.lock().await.record(&reply_text).await;
    Ok(())
}
