//! Audit trail entries.
//!
//! `AuditRecord` is what a mediator submits; the policy store stamps it with
//! an id and a timestamp to produce the `AuditEvent` that lands in the log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{JadeError, JadeResult},
    origin::Origin,
};

/// What happened to a capability use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Allowed,
    Blocked,
    /// Observed suspicious behaviour that was not a permission request.
    Detected,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Allowed => "allowed",
            AuditAction::Blocked => "blocked",
            AuditAction::Detected => "detected",
        };
        f.write_str(s)
    }
}

/// Unique identifier assigned to an event when it is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An unstamped audit entry, as submitted for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub origin: Origin,
    /// The API name exactly as it was requested, mapped or not.
    pub capability: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Value,
    /// Human-readable denial text for blocked requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

impl AuditRecord {
    pub fn allowed(origin: Origin, capability: impl Into<String>, details: Value) -> Self {
        Self {
            origin,
            capability: capability.into(),
            action: AuditAction::Allowed,
            reason: None,
            details,
            user_message: None,
        }
    }

    pub fn blocked(
        origin: Origin,
        capability: impl Into<String>,
        reason: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            origin,
            capability: capability.into(),
            action: AuditAction::Blocked,
            reason: Some(reason.into()),
            details,
            user_message: None,
        }
    }

    pub fn detected(
        origin: Origin,
        capability: impl Into<String>,
        reason: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            origin,
            capability: capability.into(),
            action: AuditAction::Detected,
            reason: Some(reason.into()),
            details,
            user_message: None,
        }
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Reject records that break the log's shape rules.
    ///
    /// A `blocked` record must say why.
    pub fn validate(&self) -> JadeResult<()> {
        if self.capability.is_empty() {
            return Err(JadeError::MalformedRequest {
                reason: "audit record has an empty capability".to_string(),
            });
        }
        let has_reason = self.reason.as_deref().is_some_and(|r| !r.is_empty());
        if self.action == AuditAction::Blocked && !has_reason {
            return Err(JadeError::MalformedRequest {
                reason: "blocked audit record requires a reason".to_string(),
            });
        }
        Ok(())
    }
}

/// A logged audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub record: AuditRecord,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Assign a fresh id and the current time to `record`.
    pub fn stamp(record: AuditRecord) -> Self {
        Self {
            id: EventId::new(),
            record,
            timestamp: Utc::now(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.record.origin
    }

    pub fn action(&self) -> AuditAction {
        self.record.action
    }
}
