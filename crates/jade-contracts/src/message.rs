//! Protocol messages for every channel hop.
//!
//! Two hops exist: interceptor → mediator (`PageMessage` / `PermissionResponse`)
//! and mediator → policy store (`StoreCall` / `StoreResponse`, wrapped in an
//! `Envelope`). The store additionally pushes `StoreNotification`s to the
//! mediators bound to an origin.
//!
//! All message kinds are enums so every receiver matches them exhaustively.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{JadeError, JadeResult},
    event::{AuditEvent, AuditRecord},
    origin::Origin,
    policy::{Policy, PolicySummary},
};

/// Single-use identifier correlating a response with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Anything that can be matched back to a pending request.
pub trait Correlated {
    fn request_id(&self) -> RequestId;
}

/// A message body tagged with the request id it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub request_id: RequestId,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(request_id: RequestId, body: T) -> Self {
        Self { request_id, body }
    }
}

impl<T> Correlated for Envelope<T> {
    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

// ── Interceptor ⇄ Mediator ───────────────────────────────────────────────────

/// A page's request to use a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub request_id: RequestId,
    /// The API name, e.g. `"fetch"`. Not validated on the page side.
    pub capability: String,
    #[serde(default)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl PermissionRequest {
    pub fn new(request_id: RequestId, capability: impl Into<String>, details: Value) -> Self {
        Self {
            request_id,
            capability: capability.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

/// Messages flowing from the page to its mediator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    PermissionRequest(PermissionRequest),
    /// Fire-and-forget report that a request was abandoned at its deadline.
    RequestTimedOut {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        capability: String,
        #[serde(rename = "waitedMs")]
        waited_ms: u64,
    },
}

impl Correlated for PageMessage {
    fn request_id(&self) -> RequestId {
        match self {
            PageMessage::PermissionRequest(request) => request.request_id,
            PageMessage::RequestTimedOut { request_id, .. } => *request_id,
        }
    }
}

/// The mediator's answer to a `PermissionRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub request_id: RequestId,
    pub allowed: bool,
    /// Alert text the host should surface to the user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PermissionResponse {
    pub fn new(request_id: RequestId, allowed: bool, notice: Option<String>) -> Self {
        Self {
            request_id,
            allowed,
            notice,
            timestamp: Utc::now(),
        }
    }
}

impl Correlated for PermissionResponse {
    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

// ── Control surface (any caller → Policy Store) ──────────────────────────────

/// Operations the policy store accepts from any caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreRequest {
    GetPolicy { origin: Origin },
    SavePolicy { origin: Origin, policy: Policy },
    ResetPolicy { origin: Origin },
    LogEvent { event: AuditRecord },
    GetLogs {
        #[serde(default)]
        limit: Option<usize>,
    },
    GetAllDomains,
    ClearLogs,
    Whitelist { origin: Origin },
}

impl StoreRequest {
    /// Parse a raw control-surface message.
    ///
    /// Unknown `type` values and missing fields are both `MalformedRequest`.
    pub fn from_json(value: Value) -> JadeResult<Self> {
        serde_json::from_value(value).map_err(|e| JadeError::MalformedRequest {
            reason: e.to_string(),
        })
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreRequest::GetPolicy { .. } => "GET_POLICY",
            StoreRequest::SavePolicy { .. } => "SAVE_POLICY",
            StoreRequest::ResetPolicy { .. } => "RESET_POLICY",
            StoreRequest::LogEvent { .. } => "LOG_EVENT",
            StoreRequest::GetLogs { .. } => "GET_LOGS",
            StoreRequest::GetAllDomains => "GET_ALL_DOMAINS",
            StoreRequest::ClearLogs => "CLEAR_LOGS",
            StoreRequest::Whitelist { .. } => "WHITELIST",
        }
    }
}

/// Everything a mediator may send over its store connection.
#[derive(Debug, Clone)]
pub enum StoreCall {
    Control(StoreRequest),
    /// Bind this connection to an origin's update notifications, replacing
    /// any previous binding.
    Subscribe { origin: Origin },
    Unsubscribe,
}

/// Success payloads. Serialized flat into the response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StoreReply {
    Policy { origin: Origin, policy: Policy },
    Event { event: AuditEvent },
    Logs { logs: Vec<AuditEvent> },
    Domains { domains: Vec<PolicySummary> },
    LogsCleared { cleared: usize },
    Subscribed { subscribed: Option<Origin> },
}

/// The store's answer to any `StoreCall`.
#[derive(Debug, Clone)]
pub enum StoreResponse {
    Success(StoreReply),
    Failure { error: String },
}

impl StoreResponse {
    pub fn from_result(result: JadeResult<StoreReply>) -> Self {
        match result {
            Ok(reply) => StoreResponse::Success(reply),
            Err(e) => StoreResponse::Failure { error: e.to_string() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StoreResponse::Success(_))
    }

    /// Render as `{success: true, ...payload}` or `{success: false, error}`.
    pub fn to_envelope(&self) -> Value {
        match self {
            StoreResponse::Success(reply) => {
                let mut body = match serde_json::to_value(reply) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) | Err(_) => serde_json::Map::new(),
                };
                body.insert("success".to_string(), Value::Bool(true));
                Value::Object(body)
            }
            StoreResponse::Failure { error } => serde_json::json!({
                "success": false,
                "error": error,
            }),
        }
    }
}

/// Pushes from the store to mediators bound to an origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreNotification {
    PolicyUpdated { origin: Origin, policy: Policy },
}
