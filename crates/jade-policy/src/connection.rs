//! Mediator ⇄ policy store hop.
//!
//! `connect` opens a correlation-channel hop to the store and spawns the
//! task that serves it. The returned `StoreConnection` carries the request
//! client and the receiving end of this connection's `POLICY_UPDATED`
//! notifications. When the client drops, the serving task ends and its
//! subscription is released.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tracing::debug;

use jade_contracts::{
    error::{JadeError, JadeResult},
    event::{AuditEvent, AuditRecord},
    message::{Envelope, StoreCall, StoreNotification, StoreReply, StoreRequest, StoreResponse},
    origin::Origin,
    policy::Policy,
};
use jade_core::channel::{channel, Requester, Responder};

use crate::store::{ConnectionId, PolicyStore};

const REQUEST_CAPACITY: usize = 64;
const NOTIFICATION_CAPACITY: usize = 16;

type StoreRequester = Requester<Envelope<StoreCall>, Envelope<StoreResponse>>;
type StoreResponder = Responder<Envelope<StoreCall>, Envelope<StoreResponse>>;

/// One mediator's link to the store.
pub struct StoreConnection {
    pub client: StoreClient,
    pub notifications: mpsc::Receiver<StoreNotification>,
}

/// Open a new hop to `store`. Requires a running Tokio runtime.
pub fn connect(store: &Arc<PolicyStore>, deadline: Duration) -> StoreConnection {
    let (requester, responder) = channel("policy-store", REQUEST_CAPACITY, deadline);
    let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_CAPACITY);
    let id = store.next_connection_id();

    tokio::spawn(serve(Arc::clone(store), id, responder, notify_tx));

    StoreConnection {
        client: StoreClient { requester },
        notifications: notify_rx,
    }
}

async fn serve(
    store: Arc<PolicyStore>,
    id: ConnectionId,
    mut responder: StoreResponder,
    notify_tx: mpsc::Sender<StoreNotification>,
) {
    debug!(connection = id.0, "store connection opened");
    let replies = responder.replies();

    while let Some(Envelope { request_id, body }) = responder.recv().await {
        match body {
            StoreCall::Control(request) => {
                // Control requests run concurrently; the hop is unordered.
                let store = Arc::clone(&store);
                let replies = replies.clone();
                tokio::spawn(async move {
                    let response = store.handle(request).await;
                    replies.send(Envelope::new(request_id, response)).await;
                });
            }
            StoreCall::Subscribe { origin } => {
                store.subscribe(id, origin.clone(), notify_tx.clone());
                let response = StoreResponse::Success(StoreReply::Subscribed {
                    subscribed: Some(origin),
                });
                replies.send(Envelope::new(request_id, response)).await;
            }
            StoreCall::Unsubscribe => {
                store.unsubscribe(id);
                let response =
                    StoreResponse::Success(StoreReply::Subscribed { subscribed: None });
                replies.send(Envelope::new(request_id, response)).await;
            }
        }
    }

    store.unsubscribe(id);
    debug!(connection = id.0, "store connection closed");
}

/// Typed request methods over a store hop.
pub struct StoreClient {
    requester: StoreRequester,
}

impl StoreClient {
    /// Send one call and unwrap the response envelope.
    pub async fn call(&self, call: StoreCall) -> JadeResult<StoreReply> {
        let response = self
            .requester
            .request(|id| Envelope::new(id, call))
            .await?;
        match response.body {
            StoreResponse::Success(reply) => Ok(reply),
            StoreResponse::Failure { error } => Err(JadeError::StoreRejected { error }),
        }
    }

    pub async fn request(&self, request: StoreRequest) -> JadeResult<StoreReply> {
        self.call(StoreCall::Control(request)).await
    }

    pub async fn get_policy(&self, origin: &Origin) -> JadeResult<Policy> {
        let reply = self
            .request(StoreRequest::GetPolicy {
                origin: origin.clone(),
            })
            .await?;
        expect_policy(reply)
    }

    pub async fn save_policy(&self, origin: &Origin, policy: Policy) -> JadeResult<Policy> {
        let reply = self
            .request(StoreRequest::SavePolicy {
                origin: origin.clone(),
                policy,
            })
            .await?;
        expect_policy(reply)
    }

    pub async fn log_event(&self, record: AuditRecord) -> JadeResult<AuditEvent> {
        match self.request(StoreRequest::LogEvent { event: record }).await? {
            StoreReply::Event { event } => Ok(event),
            other => Err(unexpected("LOG_EVENT", &other)),
        }
    }

    /// Bind this connection to `origin`'s update notifications.
    pub async fn subscribe(&self, origin: &Origin) -> JadeResult<()> {
        self.call(StoreCall::Subscribe {
            origin: origin.clone(),
        })
        .await
        .map(|_| ())
    }

    pub async fn unsubscribe(&self) -> JadeResult<()> {
        self.call(StoreCall::Unsubscribe).await.map(|_| ())
    }
}

fn expect_policy(reply: StoreReply) -> JadeResult<Policy> {
    match reply {
        StoreReply::Policy { policy, .. } => Ok(policy),
        other => Err(unexpected("policy", &other)),
    }
}

fn unexpected(wanted: &str, got: &StoreReply) -> JadeError {
    JadeError::MalformedRequest {
        reason: format!("expected {} reply, got {:?}", wanted, got),
    }
}
