//! The policy store service.
//!
//! `PolicyStore` is the single process-wide authority over policies and the
//! audit log. It is created with `init`, torn down with `shutdown`, and
//! shared behind an `Arc` by every mediator connection.
//!
//! State and locking:
//!
//! - `log` (std mutex): the bounded audit log. Prepend and truncation happen
//!   under one lock acquisition, so readers never see more than `max_logs`.
//!   Never held across an `.await`.
//! - `flush` (async mutex): serializes durable log writes so a newer slice
//!   is never overwritten by an older one.
//! - `subscribers` (std mutex): connection id → bound origin + notification
//!   sender.
//!
//! Policy saves are plain read-modify-write on storage: concurrent saves for
//! the same origin are last-write-wins and are never merged.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use jade_audit::{tally_by_origin, AuditLog, BASELINE_RISK};
use jade_contracts::{
    config::{JadeConfig, StoreConfig},
    error::{JadeError, JadeResult},
    event::{AuditEvent, AuditRecord},
    message::{StoreNotification, StoreReply, StoreRequest, StoreResponse},
    origin::Origin,
    policy::{Policy, PolicySummary},
};
use jade_core::traits::StorageService;

/// Storage key of the durable audit slice.
pub const LOGS_KEY: &str = "logs";
/// Install-time defaults written by `init` when missing.
pub const ENABLED_KEY: &str = "extensionEnabled";
pub const DEFAULT_POLICY_KEY: &str = "defaultPolicy";
pub const INSTALLED_AT_KEY: &str = "installationTime";

/// Error text returned for control messages that fail to parse.
pub const UNKNOWN_REQUEST: &str = "Unknown request type";

/// Identifies one mediator connection for subscription bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

struct Subscription {
    origin: Origin,
    tx: mpsc::Sender<StoreNotification>,
}

pub struct PolicyStore {
    storage: Arc<dyn StorageService>,
    config: StoreConfig,
    presets: BTreeMap<Origin, Policy>,
    log: Mutex<AuditLog>,
    flush: tokio::sync::Mutex<()>,
    subscribers: Mutex<HashMap<ConnectionId, Subscription>>,
    next_connection: AtomicU64,
    running: AtomicBool,
}

impl PolicyStore {
    /// Start the store.
    ///
    /// Seeds the in-memory log from the durable slice and writes the install
    /// defaults if this storage has never been initialized.
    pub async fn init(
        storage: Arc<dyn StorageService>,
        config: &JadeConfig,
    ) -> JadeResult<Arc<Self>> {
        let presets = config.preset_policies()?;
        let mut log = AuditLog::new(config.store.max_logs, config.store.persisted_logs);

        let keys = [LOGS_KEY.to_string(), INSTALLED_AT_KEY.to_string()];
        let existing = storage.get(&keys).await?;

        if let Some(raw) = existing.get(LOGS_KEY) {
            log.seed(decode_logs(raw)?);
        }

        if !existing.contains_key(INSTALLED_AT_KEY) {
            let mut defaults = Map::new();
            defaults.insert(ENABLED_KEY.to_string(), Value::Bool(config.mediator.enabled));
            defaults.insert(DEFAULT_POLICY_KEY.to_string(), to_json(&Policy::restrictive())?);
            defaults.insert(
                INSTALLED_AT_KEY.to_string(),
                json!(Utc::now().timestamp_millis()),
            );
            storage.set(defaults).await?;
            info!("first start: install defaults written");
        }

        info!(
            presets = presets.len(),
            seeded_events = log.len(),
            max_logs = config.store.max_logs,
            "policy store initialized"
        );

        Ok(Arc::new(Self {
            storage,
            config: config.store.clone(),
            presets,
            log: Mutex::new(log),
            flush: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            running: AtomicBool::new(true),
        }))
    }

    /// Flush the durable log slice and drop every subscription.
    ///
    /// Afterwards the control surface refuses new requests.
    pub async fn shutdown(&self) -> JadeResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let dropped = {
            let mut subs = self.subscribers();
            let n = subs.len();
            subs.clear();
            n
        };
        let result = self.flush_logs().await;
        info!(dropped_subscriptions = dropped, "policy store shut down");
        result
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Policies ─────────────────────────────────────────────────────────────

    /// Stored policy, else the preset for this exact origin, else the
    /// restrictive default.
    pub async fn get_policy(&self, origin: &Origin) -> JadeResult<Policy> {
        let key = origin.storage_key();
        let found = self.storage.get(std::slice::from_ref(&key)).await?;

        if let Some(raw) = found.get(&key) {
            return serde_json::from_value(raw.clone()).map_err(|e| JadeError::StorageFailure {
                reason: format!("stored policy for '{}' is unreadable: {}", origin, e),
            });
        }
        if let Some(preset) = self.presets.get(origin) {
            debug!(origin = %origin, "serving preset policy");
            return Ok(preset.clone());
        }
        Ok(Policy::restrictive())
    }

    /// Persist `policy` for `origin` and notify bound mediators.
    ///
    /// A `riskScore` above 100 is rejected as `MalformedRequest` and nothing
    /// is written.
    pub async fn save_policy(&self, origin: &Origin, mut policy: Policy) -> JadeResult<Policy> {
        policy.validate()?;
        policy.last_updated = Utc::now();

        let mut items = Map::new();
        items.insert(origin.storage_key(), to_json(&policy)?);
        self.storage.set(items).await?;

        let delivered = self.broadcast(origin, &policy);
        info!(
            origin = %origin,
            whitelisted = policy.whitelisted,
            notified = delivered,
            "policy saved"
        );
        Ok(policy)
    }

    pub async fn reset_policy(&self, origin: &Origin) -> JadeResult<Policy> {
        self.save_policy(origin, Policy::restrictive()).await
    }

    /// Mark `origin` as whitelisted, keeping its individual flags.
    pub async fn whitelist(&self, origin: &Origin) -> JadeResult<Policy> {
        let mut policy = self.get_policy(origin).await?;
        policy.whitelisted = true;
        self.save_policy(origin, policy).await
    }

    /// Every stored policy with a risk score computed from the current
    /// in-memory log, sorted by origin.
    pub async fn list_policies(&self) -> JadeResult<Vec<PolicySummary>> {
        let all = self.storage.get_all().await?;
        let tallies = tally_by_origin(self.log().iter());

        let mut summaries = Vec::new();
        for (key, raw) in all {
            let Some(origin) = Origin::from_storage_key(&key) else {
                continue;
            };
            let policy: Policy = match serde_json::from_value(raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable stored policy");
                    continue;
                }
            };
            let risk_score = tallies
                .get(&origin)
                .map(|t| t.score())
                .unwrap_or(BASELINE_RISK);
            summaries.push(PolicySummary {
                origin,
                policy,
                risk_score,
            });
        }
        summaries.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(summaries)
    }

    // ── Audit log ────────────────────────────────────────────────────────────

    /// Stamp, prepend, and persist the durable slice.
    ///
    /// A storage failure is returned to the caller, but the event stays in
    /// the in-memory log and is written with the next successful flush.
    pub async fn log_event(&self, record: AuditRecord) -> JadeResult<AuditEvent> {
        record.validate()?;
        let event = AuditEvent::stamp(record);

        let _flush = self.flush.lock().await;
        let slice = {
            let mut log = self.log();
            log.prepend(event.clone());
            log.durable_slice()
        };
        debug!(
            event_id = %event.id,
            origin = %event.origin(),
            action = %event.action(),
            capability = %event.record.capability,
            "audit event logged"
        );

        self.write_logs(slice).await.inspect_err(|e| {
            warn!(event_id = %event.id, error = %e, "durable log write failed");
        })?;
        Ok(event)
    }

    /// Newest `limit` events of the durable slice (configured default when
    /// `None`).
    ///
    /// Reads storage, so at most `persisted_logs` events come back and an
    /// event whose durable write failed stays invisible until the next
    /// successful flush.
    pub async fn query_logs(&self, limit: Option<usize>) -> JadeResult<Vec<AuditEvent>> {
        let limit = limit.unwrap_or(self.config.default_log_limit);
        let keys = [LOGS_KEY.to_string()];
        let found = self.storage.get(&keys).await?;

        let mut logs = match found.get(LOGS_KEY) {
            Some(raw) => decode_logs(raw)?,
            None => Vec::new(),
        };
        logs.truncate(limit);
        Ok(logs)
    }

    /// Empty the in-memory log and the durable slice.
    pub async fn clear_logs(&self) -> JadeResult<usize> {
        let _flush = self.flush.lock().await;
        let cleared = self.log().clear();
        self.write_logs(Vec::new()).await?;
        info!(cleared, "audit log cleared");
        Ok(cleared)
    }

    /// Current in-memory log length.
    pub fn log_len(&self) -> usize {
        self.log().len()
    }

    async fn flush_logs(&self) -> JadeResult<()> {
        let _flush = self.flush.lock().await;
        let slice = self.log().durable_slice();
        self.write_logs(slice).await
    }

    async fn write_logs(&self, slice: Vec<AuditEvent>) -> JadeResult<()> {
        let mut items = Map::new();
        items.insert(LOGS_KEY.to_string(), to_json(&slice)?);
        self.storage.set(items).await
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Bind `connection` to `origin`, replacing any earlier binding.
    pub(crate) fn subscribe(
        &self,
        connection: ConnectionId,
        origin: Origin,
        tx: mpsc::Sender<StoreNotification>,
    ) {
        debug!(connection = connection.0, origin = %origin, "mediator subscribed");
        self.subscribers()
            .insert(connection, Subscription { origin, tx });
    }

    pub(crate) fn unsubscribe(&self, connection: ConnectionId) {
        if let Some(sub) = self.subscribers().remove(&connection) {
            debug!(connection = connection.0, origin = %sub.origin, "mediator unsubscribed");
        }
    }

    /// Number of connections bound to `origin`.
    pub fn subscriber_count(&self, origin: &Origin) -> usize {
        self.subscribers()
            .values()
            .filter(|s| &s.origin == origin)
            .count()
    }

    /// Best-effort `POLICY_UPDATED` to every connection bound to `origin`.
    ///
    /// Each recipient is tried independently. Closed connections are pruned;
    /// full ones miss this update. Returns how many were delivered.
    fn broadcast(&self, origin: &Origin, policy: &Policy) -> usize {
        let mut subs = self.subscribers();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sub) in subs.iter().filter(|(_, s)| &s.origin == origin) {
            let note = StoreNotification::PolicyUpdated {
                origin: origin.clone(),
                policy: policy.clone(),
            };
            match sub.tx.try_send(note) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => dead.push(*id),
                Err(TrySendError::Full(_)) => {
                    warn!(connection = id.0, origin = %origin, "subscriber lagging, update skipped");
                }
            }
        }
        for id in dead {
            subs.remove(&id);
        }
        delivered
    }

    // ── Control surface ──────────────────────────────────────────────────────

    /// Execute one control-surface request.
    pub async fn handle(&self, request: StoreRequest) -> StoreResponse {
        if !self.is_running() {
            return StoreResponse::Failure {
                error: "policy store is shut down".to_string(),
            };
        }
        let kind = request.kind();
        let result = match request {
            StoreRequest::GetPolicy { origin } => self
                .get_policy(&origin)
                .await
                .map(|policy| StoreReply::Policy { origin, policy }),
            StoreRequest::SavePolicy { origin, policy } => self
                .save_policy(&origin, policy)
                .await
                .map(|policy| StoreReply::Policy { origin, policy }),
            StoreRequest::ResetPolicy { origin } => self
                .reset_policy(&origin)
                .await
                .map(|policy| StoreReply::Policy { origin, policy }),
            StoreRequest::Whitelist { origin } => self
                .whitelist(&origin)
                .await
                .map(|policy| StoreReply::Policy { origin, policy }),
            StoreRequest::LogEvent { event } => self
                .log_event(event)
                .await
                .map(|event| StoreReply::Event { event }),
            StoreRequest::GetLogs { limit } => self
                .query_logs(limit)
                .await
                .map(|logs| StoreReply::Logs { logs }),
            StoreRequest::GetAllDomains => self
                .list_policies()
                .await
                .map(|domains| StoreReply::Domains { domains }),
            StoreRequest::ClearLogs => self
                .clear_logs()
                .await
                .map(|cleared| StoreReply::LogsCleared { cleared }),
        };
        if let Err(e) = &result {
            warn!(request = kind, error = %e, "control request failed");
        }
        StoreResponse::from_result(result)
    }

    /// Execute a raw JSON control message and return the JSON envelope.
    pub async fn handle_json(&self, raw: Value) -> Value {
        match StoreRequest::from_json(raw) {
            Ok(request) => self.handle(request).await.to_envelope(),
            Err(e) => {
                warn!(error = %e, "rejecting malformed control message");
                StoreResponse::Failure {
                    error: UNKNOWN_REQUEST.to_string(),
                }
                .to_envelope()
            }
        }
    }

    fn log(&self) -> MutexGuard<'_, AuditLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<ConnectionId, Subscription>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode_logs(raw: &Value) -> JadeResult<Vec<AuditEvent>> {
    serde_json::from_value(raw.clone()).map_err(|e| JadeError::StorageFailure {
        reason: format!("stored audit log is unreadable: {}", e),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> JadeResult<Value> {
    serde_json::to_value(value).map_err(|e| JadeError::StorageFailure {
        reason: format!("failed to encode value for storage: {}", e),
    })
}
