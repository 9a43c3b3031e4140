//! The correlation channel: request/response over unordered message passing.
//!
//! One `channel()` call builds one hop between exactly two parties:
//!
//!   Requester ──Req──▶ Responder
//!   Requester ◀─Resp── Responder
//!
//! Every request carries a fresh `RequestId`. The requester parks a oneshot
//! slot under that id and races it against a deadline. A background router
//! matches incoming responses to slots; a response for an unknown, stale or
//! already-settled id is dropped. Slots deregister themselves on drop, so a
//! request settles exactly once, by response or by timeout.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use jade_contracts::{
    error::{JadeError, JadeResult},
    message::{Correlated, RequestId},
};

// ── Pending request table ────────────────────────────────────────────────────

type Slots<R> = Arc<Mutex<HashMap<RequestId, oneshot::Sender<R>>>>;

/// Requests awaiting a response, keyed by id.
pub struct PendingRequests<R> {
    slots: Slots<R>,
    discarded: Arc<AtomicUsize>,
}

impl<R> Clone for PendingRequests<R> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            discarded: Arc::clone(&self.discarded),
        }
    }
}

impl<R> Default for PendingRequests<R> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            discarded: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<R> PendingRequests<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a slot for `id`. The slot is removed when the returned guard drops.
    pub fn register(&self, id: RequestId) -> PendingSlot<R> {
        let (tx, rx) = oneshot::channel();
        lock(&self.slots).insert(id, tx);
        PendingSlot {
            id,
            rx,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of requests still waiting.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Responses dropped so far because no slot was waiting for them.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl<R: Correlated> PendingRequests<R> {
    /// Deliver `response` to its waiting slot.
    ///
    /// Returns `false` when no slot matches, i.e. the id is unknown, already
    /// answered, or its request has timed out.
    pub fn resolve(&self, response: R) -> bool {
        let id = response.request_id();
        let slot = lock(&self.slots).remove(&id);
        let delivered = match slot {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        };
        if !delivered {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }
}

fn lock<R>(slots: &Slots<R>) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<R>>> {
    // The table holds no invariants a panicking holder could break.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A registered slot. Dropping it deregisters the id.
pub struct PendingSlot<R> {
    id: RequestId,
    rx: oneshot::Receiver<R>,
    slots: Slots<R>,
}

impl<R> PendingSlot<R> {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<R> Drop for PendingSlot<R> {
    fn drop(&mut self) {
        lock(&self.slots).remove(&self.id);
    }
}

// ── Requester ────────────────────────────────────────────────────────────────

/// The initiating end of a hop.
pub struct Requester<Req, Resp> {
    name: &'static str,
    outbound: mpsc::Sender<Req>,
    pending: PendingRequests<Resp>,
    deadline: Duration,
    router: JoinHandle<()>,
}

impl<Req, Resp> Requester<Req, Resp>
where
    Req: Send + 'static,
    Resp: Correlated + Send + 'static,
{
    /// Send a request built around a fresh id and wait for its response.
    ///
    /// The deadline covers both enqueueing and waiting. Fails with
    /// `Timeout` when it elapses and `ChannelClosed` when the responder is
    /// gone. A response arriving after either failure is discarded.
    pub async fn request(&self, build: impl FnOnce(RequestId) -> Req) -> JadeResult<Resp> {
        let id = RequestId::new();
        let mut slot = self.pending.register(id);
        let message = build(id);

        let exchange = async {
            self.outbound.send(message).await.map_err(|_| self.closed())?;
            (&mut slot.rx).await.map_err(|_| self.closed())
        };

        match tokio::time::timeout(self.deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    endpoint = self.name,
                    request_id = %id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "request deadline elapsed, abandoning"
                );
                Err(JadeError::Timeout {
                    request_id: id.to_string(),
                    after_ms: self.deadline.as_millis() as u64,
                })
            }
        }
        // `slot` drops here, deregistering `id` on every path.
    }

    /// Send without expecting a response. Never waits; a full or closed
    /// channel drops the message.
    pub fn notify(&self, message: Req) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(endpoint = self.name, error = %e, "notification dropped");
                false
            }
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Responses the router dropped as unknown, stale or duplicate.
    pub fn discarded(&self) -> usize {
        self.pending.discarded()
    }

    fn closed(&self) -> JadeError {
        JadeError::ChannelClosed {
            endpoint: self.name.to_string(),
        }
    }
}

impl<Req, Resp> Drop for Requester<Req, Resp> {
    fn drop(&mut self) {
        self.router.abort();
    }
}

// ── Responder ────────────────────────────────────────────────────────────────

/// The answering end of a hop.
pub struct Responder<Req, Resp> {
    inbound: mpsc::Receiver<Req>,
    replies: ReplySender<Resp>,
}

impl<Req, Resp> Responder<Req, Resp> {
    /// Next request, or `None` once the requester is gone.
    pub async fn recv(&mut self) -> Option<Req> {
        self.inbound.recv().await
    }

    /// A cloneable handle for answering from spawned tasks.
    pub fn replies(&self) -> ReplySender<Resp> {
        self.replies.clone()
    }
}

/// Sends responses back to a requester.
pub struct ReplySender<Resp> {
    tx: mpsc::Sender<Resp>,
}

impl<Resp> Clone for ReplySender<Resp> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<Resp> ReplySender<Resp> {
    /// Deliver a response. Returns `false` when the requester is gone.
    pub async fn send(&self, response: Resp) -> bool {
        self.tx.send(response).await.is_ok()
    }
}

/// Build one hop.
///
/// Must be called from within a Tokio runtime: the requester's response
/// router is spawned here and aborted when the requester drops.
pub fn channel<Req, Resp>(
    name: &'static str,
    capacity: usize,
    deadline: Duration,
) -> (Requester<Req, Resp>, Responder<Req, Resp>)
where
    Req: Send + 'static,
    Resp: Correlated + Send + 'static,
{
    let (req_tx, req_rx) = mpsc::channel(capacity);
    let (resp_tx, resp_rx) = mpsc::channel(capacity);
    let pending = PendingRequests::new();
    let router = tokio::spawn(route_responses(name, resp_rx, pending.clone()));

    let requester = Requester {
        name,
        outbound: req_tx,
        pending,
        deadline,
        router,
    };
    let responder = Responder {
        inbound: req_rx,
        replies: ReplySender { tx: resp_tx },
    };
    (requester, responder)
}

async fn route_responses<Resp: Correlated>(
    name: &'static str,
    mut responses: mpsc::Receiver<Resp>,
    pending: PendingRequests<Resp>,
) {
    while let Some(response) = responses.recv().await {
        let id = response.request_id();
        if !pending.resolve(response) {
            debug!(endpoint = name, request_id = %id, "discarding unmatched response");
        }
    }
    debug!(endpoint = name, "response stream closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jade_contracts::message::{Correlated, Envelope, RequestId};

    use super::{channel, PendingRequests};

    #[tokio::test]
    async fn response_is_matched_by_id() {
        let (requester, mut responder) =
            channel::<Envelope<u32>, Envelope<u32>>("test", 8, Duration::from_secs(1));

        tokio::spawn(async move {
            let replies = responder.replies();
            while let Some(req) = responder.recv().await {
                replies.send(Envelope::new(req.request_id, req.body * 2)).await;
            }
        });

        let resp = requester.request(|id| Envelope::new(id, 21)).await.unwrap();
        assert_eq!(resp.body, 42);
        assert_eq!(requester.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_responder_times_out_and_deregisters() {
        let (requester, mut responder) =
            channel::<Envelope<u32>, Envelope<u32>>("test", 8, Duration::from_millis(2000));

        // Keep the responder alive but never answer.
        let hold = tokio::spawn(async move { while responder.recv().await.is_some() {} });

        let err = requester.request(|id| Envelope::new(id, 1)).await.unwrap_err();
        assert!(matches!(err, jade_contracts::error::JadeError::Timeout { after_ms: 2000, .. }));
        assert_eq!(requester.in_flight(), 0, "timed out slot must be removed");
        assert_eq!(requester.discarded(), 0);
        hold.abort();
    }

    #[tokio::test]
    async fn dropped_responder_fails_fast() {
        let (requester, responder) =
            channel::<Envelope<u32>, Envelope<u32>>("test", 8, Duration::from_secs(5));
        drop(responder);

        let err = requester.request(|id| Envelope::new(id, 1)).await.unwrap_err();
        assert!(matches!(err, jade_contracts::error::JadeError::ChannelClosed { .. }));
    }

    #[test]
    fn late_and_duplicate_responses_are_discarded() {
        let pending: PendingRequests<Envelope<&str>> = PendingRequests::new();
        let id = RequestId::new();

        // Unknown id.
        assert!(!pending.resolve(Envelope::new(id, "stray")));

        let slot = pending.register(id);
        assert_eq!(slot.id(), id);
        drop(slot); // the timeout path drops its slot

        // Late response after deregistration.
        assert!(!pending.resolve(Envelope::new(id, "late")));
        assert!(pending.is_empty());
        assert_eq!(pending.discarded(), 2);
    }

    #[tokio::test]
    async fn exactly_one_response_is_delivered() {
        let pending: PendingRequests<Envelope<u8>> = PendingRequests::new();
        let id = RequestId::new();
        let mut slot = pending.register(id);

        assert!(pending.resolve(Envelope::new(id, 1)));
        assert!(!pending.resolve(Envelope::new(id, 2)), "duplicate must be dropped");

        let first = (&mut slot.rx).await.unwrap();
        assert_eq!(first.body, 1);
        assert_eq!(first.request_id(), id);
    }
}
