//! The per-context mediator.
//!
//! A `Mediator` belongs to one browsing context. It is bound to one origin
//! at a time and keeps a read-through cache of that origin's policy,
//! refreshed by `POLICY_UPDATED` pushes from the store.
//!
//! The cache is an `Arc<Policy>` swapped under a short write lock. A
//! decision clones the `Arc` once at its start and evaluates against that
//! snapshot, so an update landing mid-decision never affects it.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use jade_contracts::{
    capability::Capability,
    config::MediatorConfig,
    error::JadeResult,
    event::{AuditEvent, AuditRecord},
    message::{PageMessage, PermissionRequest, PermissionResponse, RequestId, StoreNotification},
    origin::Origin,
    policy::Policy,
};
use jade_core::channel::Responder;
use jade_policy::{StoreClient, StoreConnection};

use crate::{
    detect::{detect, Detection, ElementSnapshot},
    verdict::{evaluate, user_message, DenyReason},
};

/// Content security policy applied when the network is not allowed.
pub const RESTRICTIVE_CSP: &str =
    "default-src 'self'; script-src 'self' 'unsafe-inline'; connect-src 'self';";

/// Notice used when a notifying denial has no template message.
const FALLBACK_NOTICE: &str = "Blocked suspicious activity";

/// Audit capability name for element detections.
const DOM_CAPABILITY: &str = "DOM";

/// The outcome of one `decide` call.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub user_message: Option<String>,
    /// The host should surface `user_message` to the user.
    pub notify: bool,
    /// The logged audit event, if the store accepted it.
    pub event: Option<AuditEvent>,
}

impl Decision {
    /// The permission response for `request_id`.
    pub fn response(&self, request_id: RequestId) -> PermissionResponse {
        let notice = self.notify.then(|| {
            self.user_message
                .clone()
                .unwrap_or_else(|| FALLBACK_NOTICE.to_string())
        });
        PermissionResponse::new(request_id, self.allowed, notice)
    }
}

struct Binding {
    origin: Origin,
    /// Set by `bind`, cleared by `unbind`. Pushes are ignored while unset.
    bound: bool,
    policy: Option<Arc<Policy>>,
}

pub struct Mediator {
    store: StoreClient,
    config: MediatorConfig,
    binding: RwLock<Binding>,
}

impl Mediator {
    /// Create a mediator for a context currently at `origin`.
    ///
    /// No policy is loaded until [`Mediator::bind`] completes; decisions
    /// before that are denied. Spawns the notification listener, so it must
    /// be called inside a Tokio runtime.
    pub fn start(connection: StoreConnection, origin: Origin, config: MediatorConfig) -> Arc<Self> {
        let StoreConnection {
            client,
            notifications,
        } = connection;
        let mediator = Arc::new(Self {
            store: client,
            config,
            binding: RwLock::new(Binding {
                origin,
                bound: false,
                policy: None,
            }),
        });
        tokio::spawn(listen(Arc::downgrade(&mediator), notifications));
        mediator
    }

    pub fn origin(&self) -> Origin {
        self.read().origin.clone()
    }

    /// The cached policy, if one is loaded.
    pub fn policy(&self) -> Option<Arc<Policy>> {
        self.read().policy.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // ── Binding ──────────────────────────────────────────────────────────────

    /// Bind to `origin`: discard the cache, subscribe to its updates and
    /// fetch its policy.
    ///
    /// The subscription is placed before the fetch, so an update racing the
    /// fetch is kept rather than overwritten by the older fetched value.
    pub async fn bind(&self, origin: Origin) -> JadeResult<Arc<Policy>> {
        {
            let mut binding = self.write();
            binding.origin = origin.clone();
            binding.bound = true;
            binding.policy = None;
        }
        self.store.subscribe(&origin).await?;
        let fetched = Arc::new(self.store.get_policy(&origin).await?);

        let policy = {
            let mut binding = self.write();
            if !binding.bound || binding.origin != origin {
                // Unbound or re-bound elsewhere while fetching.
                return Ok(fetched);
            }
            binding.policy.get_or_insert(fetched).clone()
        };

        info!(
            origin = %origin,
            whitelisted = policy.whitelisted,
            granted = policy.capabilities.granted().count(),
            csp = policy_csp(Some(&policy)).is_some(),
            "mediator bound"
        );
        Ok(policy)
    }

    /// Drop the cached policy and the update subscription.
    ///
    /// Decisions already in flight finish against the policy they captured.
    /// Updates still queued from the store are ignored from here on.
    pub async fn unbind(&self) -> JadeResult<()> {
        {
            let mut binding = self.write();
            binding.bound = false;
            binding.policy = None;
        }
        self.store.unsubscribe().await?;
        debug!(origin = %self.origin(), "mediator unbound");
        Ok(())
    }

    /// Apply a pushed policy. Ignored unless the mediator is bound and the
    /// update is for its origin.
    pub fn on_policy_updated(&self, origin: &Origin, policy: Policy) -> bool {
        let mut binding = self.write();
        if !binding.bound {
            debug!(origin = %origin, "ignoring update while unbound");
            return false;
        }
        if &binding.origin != origin {
            debug!(origin = %origin, bound = %binding.origin, "ignoring update for other origin");
            return false;
        }
        binding.policy = Some(Arc::new(policy));
        debug!(origin = %origin, "cached policy replaced");
        true
    }

    /// React to the context navigating to `url`. Re-binds only when the
    /// origin changes; returns whether it did.
    pub async fn on_context_navigated(&self, url: &str) -> JadeResult<bool> {
        let origin = Origin::from_url(url);
        if origin == self.origin() {
            return Ok(false);
        }
        info!(from = %self.origin(), to = %origin, "context navigated, re-binding");
        self.bind(origin).await?;
        Ok(true)
    }

    /// The CSP the host should install for the current policy, if any.
    pub fn content_security_policy(&self) -> Option<&'static str> {
        policy_csp(self.policy().as_deref())
    }

    // ── Decisions ────────────────────────────────────────────────────────────

    /// Decide whether `api` may proceed and log the outcome.
    ///
    /// Produces exactly one audit record per call. A failed log write is
    /// reported but does not change the decision.
    pub async fn decide(&self, api: &str, details: Value) -> Decision {
        let (origin, policy) = {
            let binding = self.read();
            (binding.origin.clone(), binding.policy.clone())
        };

        match evaluate(self.config.enabled, api, policy.as_deref()) {
            Ok(_) => {
                let record = AuditRecord::allowed(origin, api, details);
                Decision {
                    allowed: true,
                    reason: None,
                    user_message: None,
                    notify: false,
                    event: self.log(record).await,
                }
            }
            Err(reason) => {
                let message = matches!(reason, DenyReason::PolicyViolation(_))
                    .then(|| user_message(api, &details));
                let mut record =
                    AuditRecord::blocked(origin.clone(), api, reason.to_string(), details);
                if let Some(m) = &message {
                    record = record.with_user_message(m.clone());
                }
                warn!(origin = %origin, api, reason = %reason, "capability denied");
                Decision {
                    allowed: false,
                    notify: self.should_notify(api),
                    reason: Some(reason),
                    user_message: message,
                    event: self.log(record).await,
                }
            }
        }
    }

    /// Log a request the interceptor abandoned at its deadline.
    pub async fn record_timeout(
        &self,
        request_id: RequestId,
        api: &str,
        waited_ms: u64,
    ) -> Option<AuditEvent> {
        let origin = self.origin();
        let reason = DenyReason::Timeout { waited_ms };
        warn!(origin = %origin, api, request_id = %request_id, "permission request timed out");
        let record = AuditRecord::blocked(
            origin,
            api,
            reason.to_string(),
            json!({ "requestId": request_id }),
        );
        self.log(record).await
    }

    /// Run the tracking heuristics on one added element and log a hit.
    pub async fn inspect_element(&self, element: &ElementSnapshot) -> Option<Detection> {
        let detection = detect(element)?;
        let origin = self.origin();
        debug!(origin = %origin, src = %element.src, reason = detection.reason(), "suspicious element");
        let record = AuditRecord::detected(
            origin,
            DOM_CAPABILITY,
            detection.reason(),
            detection.details(element),
        );
        self.log(record).await;
        Some(detection)
    }

    fn should_notify(&self, api: &str) -> bool {
        self.config.notify_apis.iter().any(|a| a == api)
    }

    async fn log(&self, record: AuditRecord) -> Option<AuditEvent> {
        match self.store.log_event(record).await {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "failed to log audit event");
                None
            }
        }
    }

    // ── Page channel ─────────────────────────────────────────────────────────

    /// Answer page messages until the interceptor side goes away.
    ///
    /// Each request is decided on its own task; responses go back in
    /// whatever order decisions finish.
    pub async fn serve(self: Arc<Self>, mut page: Responder<PageMessage, PermissionResponse>) {
        let replies = page.replies();
        while let Some(message) = page.recv().await {
            let mediator = Arc::clone(&self);
            match message {
                PageMessage::PermissionRequest(PermissionRequest {
                    request_id,
                    capability,
                    details,
                    ..
                }) => {
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        let decision = mediator.decide(&capability, details).await;
                        if !replies.send(decision.response(request_id)).await {
                            debug!(request_id = %request_id, "page gone before response");
                        }
                    });
                }
                PageMessage::RequestTimedOut {
                    request_id,
                    capability,
                    waited_ms,
                } => {
                    tokio::spawn(async move {
                        mediator.record_timeout(request_id, &capability, waited_ms).await;
                    });
                }
            }
        }
        debug!(origin = %self.origin(), "page channel closed");
    }

    fn read(&self) -> RwLockReadGuard<'_, Binding> {
        self.binding.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Binding> {
        self.binding.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn policy_csp(policy: Option<&Policy>) -> Option<&'static str> {
    match policy {
        Some(p) if p.allows(Capability::Network) => None,
        _ => Some(RESTRICTIVE_CSP),
    }
}

async fn listen(mediator: Weak<Mediator>, mut notifications: mpsc::Receiver<StoreNotification>) {
    while let Some(note) = notifications.recv().await {
        let Some(mediator) = mediator.upgrade() else {
            break;
        };
        match note {
            StoreNotification::PolicyUpdated { origin, policy } => {
                mediator.on_policy_updated(&origin, policy);
            }
        }
    }
}
