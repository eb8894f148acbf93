/// Generic webhook-backed channel adapter.
///
/// Implements the inbound-webhook contract shared by every configured
/// channel (signature verification, size/rate gating, sanitize-then-publish,
/// fast ack) and sends outbound replies by POSTing signed JSON to the
/// channel's configured `webhook_url`.
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::bus::events::ChatType;
use crate::bus::{InboundMessage, OutboundMessage};
use crate::channels::base::BaseChannel;
use crate::config::schema::ChannelConfig;
use crate::safety::prompt_guard::PromptGuard;

type HmacSha256 = Hmac<Sha256>;

/// Max inbound webhook payload size: 1 MB.
const MAX_BODY_BYTES: usize = 1_048_576;

/// Minimum gap between accepted requests from a single channel, per-process.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(50);

/// Sign a body with HMAC-SHA256 and return the hex digest.
fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("webhook secret is not a valid HMAC key")?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a signature header against the expected HMAC.
/// Accepts both a raw hex digest and a `sha256=...` prefixed form.
fn signature_valid(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(expected) = sign(secret, body) else {
        return false;
    };
    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

/// State shared by every registered webhook route.
#[derive(Clone)]
pub struct WebhookRoute {
    pub channel_name: String,
    pub config: ChannelConfig,
    pub guard: Arc<PromptGuard>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    last_accept: Arc<Mutex<Option<Instant>>>,
}

impl WebhookRoute {
    pub fn new(
        channel_name: impl Into<String>,
        config: ChannelConfig,
        guard: Arc<PromptGuard>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            config,
            guard,
            inbound_tx,
            last_accept: Arc::new(Mutex::new(None)),
        }
    }
}

/// Inbound webhook payload: tolerant of both a bare-text body and a JSON
/// envelope carrying `sender`/`chat_id`/`text`.
#[derive(Debug, serde::Deserialize, Default)]
struct InboundPayload {
    #[serde(default)]
    sender: Option<String>,
    #[serde(default, rename = "senderName")]
    sender_name: Option<String>,
    #[serde(default, rename = "chatId")]
    chat_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
    #[serde(default, rename = "isGroup")]
    is_group: bool,
}

/// Axum handler for `POST /channels/{name}/webhook`.
pub async fn inbound_handler(
    State(route): State<WebhookRoute>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if name != route.channel_name {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !route.config.enabled {
        debug!("webhook {}: channel disabled", name);
        return StatusCode::NOT_FOUND.into_response();
    }
    if body.len() > MAX_BODY_BYTES {
        warn!("webhook {}: payload too large ({} bytes)", name, body.len());
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let signature = headers
        .get("X-Signature-256")
        .or_else(|| headers.get("X-Hub-Signature-256"))
        .or_else(|| headers.get("X-Webhook-Signature"))
        .and_then(|v| v.to_str().ok());
    let Some(signature) = signature else {
        warn!("webhook {}: missing signature header", name);
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !signature_valid(&route.config.webhook_secret, signature, &body) {
        warn!("webhook {}: invalid signature", name);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    {
        let mut last = route.last_accept.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last
            && now.duration_since(prev) < MIN_REQUEST_INTERVAL
        {
            warn!("webhook {}: rate limited", name);
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
        *last = Some(now);
    }

    let payload: InboundPayload = serde_json::from_slice(&body).unwrap_or_default();
    let raw_text = payload.text.unwrap_or_default();
    let sanitized = route.guard.sanitize(&raw_text);

    let message = InboundMessage {
        channel: name.clone(),
        sender_id: payload.sender.unwrap_or_else(|| "unknown".to_string()),
        sender_name: payload.sender_name,
        message_id: payload
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        chat_id: payload.chat_id.unwrap_or_else(|| "unknown".to_string()),
        chat_type: if payload.is_group {
            ChatType::Group
        } else {
            ChatType::Direct
        },
        content: sanitized,
        mentions: Vec::new(),
        attachments: Vec::new(),
        timestamp: chrono::Utc::now(),
        thread_id: None,
        is_from_me: false,
        metadata: std::collections::HashMap::new(),
    };

    if let Err(e) = route.inbound_tx.send(message).await {
        warn!("webhook {}: failed to publish inbound message: {}", name, e);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    (StatusCode::OK, "Processing...").into_response()
}

/// Outbound sender for a channel backed by a plain webhook URL.
pub struct WebhookChannel {
    name: String,
    config: ChannelConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BaseChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        if self.config.webhook_url.is_empty() {
            anyhow::bail!("channel {}: webhook_url is not configured", self.name);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let body = serde_json::to_vec(msg)?;
        let signature = sign(&self.config.webhook_secret, &body)?;
        self.client
            .post(&self.config.webhook_url)
            .header("X-Signature-256", format!("sha256={}", signature))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("channel {}: webhook delivery failed", self.name))?
            .error_for_status()
            .with_context(|| format!("channel {}: webhook returned an error status", self.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
