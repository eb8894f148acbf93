use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            — printed normally via `&self.field_name`
/// - `redact(field_name)`    — `String` field: shows `[empty]` or `[REDACTED]`
/// - `redact_option(field_name)` — `Option<String>` field: shows `None` or `Some("[REDACTED]")`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, redact_option($field:ident)) => {
        $builder.field(
            stringify!($field),
            &$self.$field.as_ref().map(|_| "[REDACTED]"),
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, redact_option($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact_option($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules — declared after the macro so they can use `redact_debug!`
mod channels;

pub use channels::*;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Agent defaults
// ---------------------------------------------------------------------------

/// Reasoning-effort level requested from the model. A fallback provider
/// without thinking support downgrades `Extended`/`Max` to `Standard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Standard,
    Extended,
    Max,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_ping_pong_turns() -> u32 {
    2
}

fn default_history_limit() -> usize {
    50
}

fn default_echo_cache_ttl_secs() -> u64 {
    5
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    /// Ordered fallback chain tried after the primary model fails or times out.
    #[serde(default, rename = "fallbackModels")]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_max_tokens", rename = "maxTokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default, rename = "thinkingLevel")]
    pub thinking_level: ThinkingLevel,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    pub timeout_secs: u64,
    /// Maximum number of consecutive subagent-to-subagent announce turns
    /// before the exchange is forcibly terminated.
    #[serde(default = "default_max_ping_pong_turns", rename = "maxPingPongTurns")]
    pub max_ping_pong_turns: u32,
    /// Number of prior turns replayed into a freshly (re)initialized session.
    #[serde(default = "default_history_limit", rename = "historyLimit")]
    pub history_limit: usize,
    #[serde(default = "default_echo_cache_ttl_secs", rename = "echoCacheTtlSecs")]
    pub echo_cache_ttl_secs: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            thinking_level: ThinkingLevel::default(),
            timeout_secs: default_timeout_secs(),
            max_ping_pong_turns: default_max_ping_pong_turns(),
            history_limit: default_history_limit(),
            echo_cache_ttl_secs: default_echo_cache_ttl_secs(),
        }
    }
}

redact_debug!(
    AgentDefaults,
    model,
    fallback_models,
    max_tokens,
    temperature,
    thinking_level,
    timeout_secs,
    max_ping_pong_turns,
    history_limit,
    echo_cache_ttl_secs,
);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18790
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub webhooks: HashMap<String, WebhookConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            webhooks: HashMap::new(),
        }
    }
}

/// Configuration for a named inbound webhook receiver.
///
/// Each webhook is available at `POST /api/webhook/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HMAC-SHA256 secret for signature validation.
    pub secret: String,
    /// Target channels to deliver the resulting message to.
    #[serde(default)]
    pub targets: Vec<WebhookTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub channel: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

fn default_run_log_max_entries() -> usize {
    200
}

fn default_reaper_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Per-job run-log entries retained before the oldest are pruned.
    #[serde(default = "default_run_log_max_entries", rename = "runLogMaxEntries")]
    pub run_log_max_entries: usize,
    /// Interval between session-reaper sweeps of `:run:` scratch sessions.
    #[serde(default = "default_reaper_interval_secs", rename = "reaperIntervalSecs")]
    pub reaper_interval_secs: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            run_log_max_entries: default_run_log_max_entries(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// 15 minutes — the window observed from the teacher's pairing implementation.
/// The spec's own guess of "~24h" is unconfirmed, so the shorter, observed
/// value is kept as the default and exposed here as an override.
fn default_pairing_code_ttl_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    #[serde(default = "default_pairing_code_ttl_secs", rename = "codeTtlSecs")]
    pub code_ttl_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_pairing_code_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Restart controller
// ---------------------------------------------------------------------------

fn default_restart_cooldown_secs() -> u64 {
    30
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_restart_cooldown_secs", rename = "cooldownSecs")]
    pub cooldown_secs: u64,
    /// Service-manager command used to restart the process (e.g. a
    /// `launchctl kickstart` or `systemctl restart` invocation). Empty means
    /// the restart controller only exits the process and relies on an
    /// external supervisor to relaunch it.
    #[serde(default, rename = "serviceCommand")]
    pub service_command: Vec<String>,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_restart_cooldown_secs(),
            service_command: Vec::new(),
        }
    }
}

redact_debug!(RestartConfig, cooldown_secs, service_command,);

// ---------------------------------------------------------------------------
// Session init
// ---------------------------------------------------------------------------

fn default_reset_triggers() -> Vec<String> {
    vec!["/new".to_string(), "/reset".to_string()]
}

/// A direct chat goes stale slowly; a group chat resets faster so an old
/// thread doesn't silently reattach itself to an unrelated conversation.
fn default_direct_idle_ms() -> u64 {
    6 * 60 * 60 * 1000
}

fn default_group_idle_ms() -> u64 {
    60 * 60 * 1000
}

fn default_thread_idle_ms() -> u64 {
    60 * 60 * 1000
}

fn default_chunk_limit() -> usize {
    3500
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Case-insensitive triggers that start a fresh session when matched
    /// against an inbound message (after structural-prefix stripping).
    #[serde(default = "default_reset_triggers", rename = "resetTriggers")]
    pub reset_triggers: Vec<String>,
    #[serde(default = "default_direct_idle_ms", rename = "directIdleMs")]
    pub direct_idle_ms: u64,
    #[serde(default = "default_group_idle_ms", rename = "groupIdleMs")]
    pub group_idle_ms: u64,
    #[serde(default = "default_thread_idle_ms", rename = "threadIdleMs")]
    pub thread_idle_ms: u64,
    /// Default outbound text chunk cap, overridable per channel.
    #[serde(default = "default_chunk_limit", rename = "defaultChunkLimit")]
    pub default_chunk_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_triggers: default_reset_triggers(),
            direct_idle_ms: default_direct_idle_ms(),
            group_idle_ms: default_group_idle_ms(),
            thread_idle_ms: default_thread_idle_ms(),
            default_chunk_limit: default_chunk_limit(),
        }
    }
}

redact_debug!(
    SessionConfig,
    reset_triggers,
    direct_idle_ms,
    group_idle_ms,
    thread_idle_ms,
    default_chunk_limit,
);

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn workspace_path(&self) -> PathBuf {
        crate::utils::get_switchboard_home().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), crate::errors::SwitchboardError> {
        self.validate_agent_defaults()?;
        self.validate_gateway()?;
        self.validate_channels()?;
        self.validate_cron()?;
        self.validate_session()?;
        Ok(())
    }

    fn validate_agent_defaults(&self) -> Result<(), crate::errors::SwitchboardError> {
        use crate::errors::SwitchboardError;
        let d = &self.agents.defaults;

        if d.max_tokens == 0 {
            return Err(SwitchboardError::Config(
                "agents.defaults.maxTokens must be > 0".into(),
            ));
        }
        if d.max_tokens > 1_000_000 {
            return Err(SwitchboardError::Config(
                "agents.defaults.maxTokens is unreasonably large (> 1,000,000)".into(),
            ));
        }
        if d.temperature.is_nan() || d.temperature.is_infinite() || !(0.0..=2.0).contains(&d.temperature) {
            return Err(SwitchboardError::Config(
                "agents.defaults.temperature must be a finite number between 0.0 and 2.0".into(),
            ));
        }
        if d.timeout_secs == 0 {
            return Err(SwitchboardError::Config(
                "agents.defaults.timeoutSecs must be > 0".into(),
            ));
        }
        if d.max_ping_pong_turns == 0 {
            return Err(SwitchboardError::Config(
                "agents.defaults.maxPingPongTurns must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), crate::errors::SwitchboardError> {
        use crate::errors::SwitchboardError;

        if self.gateway.port == 0 {
            return Err(SwitchboardError::Config("gateway.port must be > 0".into()));
        }
        if self.gateway.port < 1024 {
            warn!(
                "gateway.port {} is a privileged port (< 1024), may require elevated permissions",
                self.gateway.port
            );
        }
        for (name, wh) in &self.gateway.webhooks {
            if wh.enabled && wh.secret.is_empty() {
                return Err(SwitchboardError::Config(format!(
                    "gateway.webhooks.{name}.secret is required when the webhook is enabled"
                )));
            }
        }
        Ok(())
    }

    fn validate_channels(&self) -> Result<(), crate::errors::SwitchboardError> {
        use crate::errors::SwitchboardError;

        for (name, ch) in &self.channels.channels {
            if ch.enabled && matches!(ch.dm_policy, DmPolicy::Pairing) && self.pairing.code_ttl_secs == 0 {
                return Err(SwitchboardError::Config(format!(
                    "channels.{name} uses dmPolicy=pairing but pairing.codeTtlSecs is 0"
                )));
            }
        }
        Ok(())
    }

    fn validate_cron(&self) -> Result<(), crate::errors::SwitchboardError> {
        use crate::errors::SwitchboardError;

        if self.cron.run_log_max_entries == 0 {
            return Err(SwitchboardError::Config(
                "cron.runLogMaxEntries must be > 0".into(),
            ));
        }
        if self.cron.reaper_interval_secs == 0 {
            return Err(SwitchboardError::Config(
                "cron.reaperIntervalSecs must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), crate::errors::SwitchboardError> {
        use crate::errors::SwitchboardError;

        if self.session.reset_triggers.is_empty() {
            return Err(SwitchboardError::Config(
                "session.resetTriggers must not be empty".into(),
            ));
        }
        if self.session.default_chunk_limit == 0 {
            return Err(SwitchboardError::Config(
                "session.defaultChunkLimit must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Collect all non-empty secret values for leak detection. The leak
    /// detector uses these to scan outbound messages for encoded variants
    /// (raw, base64, hex).
    pub fn collect_secrets(&self) -> Vec<(&str, &str)> {
        let mut secrets = Vec::new();

        for (name, ch) in &self.channels.channels {
            if !ch.webhook_secret.is_empty() {
                secrets.push(("channel_webhook_secret", ch.webhook_secret.as_str()));
            }
            let _ = name;
        }
        for wh in self.gateway.webhooks.values() {
            if !wh.secret.is_empty() {
                secrets.push(("webhook_secret", wh.secret.as_str()));
            }
        }

        secrets
    }
}
