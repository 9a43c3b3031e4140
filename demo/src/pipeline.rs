//! Wires the three tiers together over an in-memory storage backend and an
//! in-memory page runtime.

use std::sync::Arc;

use tracing::debug;

use jade_contracts::{
    config::JadeConfig,
    error::JadeResult,
    event::AuditEvent,
    message::{PageMessage, PermissionResponse},
    origin::Origin,
};
use jade_core::channel::{channel, Responder};
use jade_interceptor::{Host, MemoryHost, PageContext, PermissionGate};
use jade_mediator::Mediator;
use jade_policy::{connect, MemoryStorage, PolicyStore};

const PAGE_CHANNEL_CAPACITY: usize = 32;

pub struct Pipeline {
    pub store: Arc<PolicyStore>,
    pub config: JadeConfig,
}

/// One open page: its mediator and its page runtime.
pub struct Tab {
    pub mediator: Arc<Mediator>,
    pub host: Arc<MemoryHost>,
    pub page: PageContext,
}

impl Tab {
    pub fn apis(&self) -> Arc<dyn Host> {
        self.page.apis()
    }
}

impl Pipeline {
    pub async fn start(config: JadeConfig) -> JadeResult<Self> {
        let store = PolicyStore::init(Arc::new(MemoryStorage::new()), &config).await?;
        Ok(Self { store, config })
    }

    /// Open `url` in a new tab with a bound mediator and an installed
    /// interceptor.
    pub async fn open(&self, url: &str) -> JadeResult<Tab> {
        let (mediator, host, page) = self.prepare(url).await?;
        let (requester, responder) = channel(
            "page",
            PAGE_CHANNEL_CAPACITY,
            self.config.interceptor.decision_timeout(),
        );
        tokio::spawn(Arc::clone(&mediator).serve(responder));
        page.install(PermissionGate::new(requester));
        Ok(Tab {
            mediator,
            host,
            page,
        })
    }

    /// Like [`Pipeline::open`], but the mediator never answers permission
    /// requests. Timeout reports still reach it.
    pub async fn open_stalled(&self, url: &str) -> JadeResult<Tab> {
        let (mediator, host, page) = self.prepare(url).await?;
        let (requester, responder) = channel(
            "page",
            PAGE_CHANNEL_CAPACITY,
            self.config.interceptor.decision_timeout(),
        );
        tokio::spawn(stall(Arc::clone(&mediator), responder));
        page.install(PermissionGate::new(requester));
        Ok(Tab {
            mediator,
            host,
            page,
        })
    }

    pub async fn recent(&self, limit: usize) -> JadeResult<Vec<AuditEvent>> {
        self.store.query_logs(Some(limit)).await
    }

    async fn prepare(&self, url: &str) -> JadeResult<(Arc<Mediator>, Arc<MemoryHost>, PageContext)> {
        let origin = Origin::from_url(url);
        let mediator = Mediator::start(
            connect(&self.store, self.config.interceptor.decision_timeout()),
            origin.clone(),
            self.config.mediator.clone(),
        );
        mediator.bind(origin).await?;
        let host = Arc::new(MemoryHost::new());
        let page = PageContext::new(host.clone());
        Ok((mediator, host, page))
    }
}

async fn stall(mediator: Arc<Mediator>, mut page: Responder<PageMessage, PermissionResponse>) {
    while let Some(message) = page.recv().await {
        match message {
            PageMessage::PermissionRequest(request) => {
                debug!(request_id = %request.request_id, "stalled mediator dropping request");
            }
            PageMessage::RequestTimedOut {
                request_id,
                capability,
                waited_ms,
            } => {
                mediator.record_timeout(request_id, &capability, waited_ms).await;
            }
        }
    }
}
