//! The page end of the interceptor ⇄ mediator hop.
//!
//! A `PermissionGate` turns "may I call this API?" into one correlated
//! request with a deadline. Every failure is a denial: timeout, a closed
//! channel and an explicit `allowed = false` all resolve to `false`, exactly
//! once. On timeout the mediator is told, fire-and-forget, so the abandoned
//! request still shows up in the audit log.

use serde_json::Value;
use tracing::{debug, warn};

use jade_contracts::{
    error::JadeError,
    message::{PageMessage, PermissionRequest, PermissionResponse, RequestId},
};
use jade_core::channel::Requester;

/// The resolved answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub allowed: bool,
    /// Alert text to surface to the user, if the mediator asked for one.
    pub notice: Option<String>,
}

impl Permission {
    fn denied() -> Self {
        Self {
            allowed: false,
            notice: None,
        }
    }
}

pub struct PermissionGate {
    requester: Requester<PageMessage, PermissionResponse>,
}

impl PermissionGate {
    pub fn new(requester: Requester<PageMessage, PermissionResponse>) -> Self {
        Self { requester }
    }

    /// Ask the mediator whether `api` may proceed.
    pub async fn check(&self, api: &str, details: Value) -> Permission {
        let mut sent: Option<RequestId> = None;
        let result = self
            .requester
            .request(|id| {
                sent = Some(id);
                PageMessage::PermissionRequest(PermissionRequest::new(id, api, details))
            })
            .await;

        match result {
            Ok(response) => {
                debug!(api, request_id = %response.request_id, allowed = response.allowed, "permission resolved");
                Permission {
                    allowed: response.allowed,
                    notice: response.notice,
                }
            }
            Err(JadeError::Timeout { after_ms, .. }) => {
                if let Some(request_id) = sent {
                    self.requester.notify(PageMessage::RequestTimedOut {
                        request_id,
                        capability: api.to_string(),
                        waited_ms: after_ms,
                    });
                }
                Permission::denied()
            }
            Err(e) => {
                warn!(api, error = %e, "permission request failed, denying");
                Permission::denied()
            }
        }
    }

    /// Requests currently waiting for a decision.
    pub fn in_flight(&self) -> usize {
        self.requester.in_flight()
    }

    /// Decisions that arrived after their request had already settled.
    pub fn late_responses(&self) -> usize {
        self.requester.discarded()
    }
}
