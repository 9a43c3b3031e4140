//! # jade-interceptor
//!
//! The in-page tier of the JADE pipeline.
//!
//! [`PageContext`] holds a page's live [`Host`] binding. Installing the
//! [`Interceptor`] replaces it with a wrapper that sends a permission
//! request to the mediator through a [`PermissionGate`] before every
//! primitive call, and only calls through when the answer is `allowed`.
//!
//! Denials follow each API's own error contract (see [`host`]). A request
//! with no answer by the deadline is denied and reported to the mediator.

pub mod error;
pub mod gate;
pub mod host;
pub mod interceptor;
pub mod memory;

pub use error::HostError;
pub use gate::{Permission, PermissionGate};
pub use host::Host;
pub use interceptor::{Interceptor, PageContext};
pub use memory::MemoryHost;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use tokio::sync::oneshot;

    use jade_contracts::{
        capability::{Capability, HostApi},
        config::JadeConfig,
        event::{AuditAction, AuditEvent},
        message::{PageMessage, PermissionResponse},
        origin::Origin,
        policy::Policy,
    };
    use jade_core::channel::channel;
    use jade_mediator::Mediator;
    use jade_policy::{connect, MemoryStorage, PolicyStore};

    use crate::{
        error::PERMISSION_DENIED,
        host::{FetchRequest, NotificationPermission, StorageArea},
        Host, HostError, MemoryHost, PageContext, PermissionGate,
    };

    // ── Harness ───────────────────────────────────────────────────────────────

    /// Store, one mediator bound to `origin`, and a page with the
    /// interceptor installed over a `MemoryHost`.
    struct Pipeline {
        store: Arc<PolicyStore>,
        mediator: Arc<Mediator>,
        host: Arc<MemoryHost>,
        page: PageContext,
    }

    impl Pipeline {
        async fn new(origin: &str) -> Self {
            let config = JadeConfig::default();
            let deadline = config.interceptor.decision_timeout();
            let store = PolicyStore::init(Arc::new(MemoryStorage::new()), &config)
                .await
                .unwrap();

            let mediator = Mediator::start(
                connect(&store, deadline),
                Origin::new(origin),
                config.mediator.clone(),
            );
            mediator.bind(Origin::new(origin)).await.unwrap();

            let (requester, responder) = channel("page", 32, deadline);
            tokio::spawn(Arc::clone(&mediator).serve(responder));

            let host = Arc::new(MemoryHost::new());
            let page = PageContext::new(host.clone());
            page.install(PermissionGate::new(requester));

            Self {
                store,
                mediator,
                host,
                page,
            }
        }

        fn apis(&self) -> Arc<dyn Host> {
            self.page.apis()
        }

        async fn last_log(&self) -> AuditEvent {
            let mut logs = self.store.query_logs(Some(1)).await.unwrap();
            logs.remove(0)
        }

        async fn last_log_reason(&self) -> Option<String> {
            self.last_log().await.record.reason
        }
    }

    // ── 1. named scenarios ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_default_deny_blocks_fetch_without_touching_host() {
        let p = Pipeline::new("example.com").await;

        let err = p
            .apis()
            .fetch(FetchRequest::get("https://api.example.com/data"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "JADE: Network request blocked by policy");
        assert!(err.is_denial());
        assert_eq!(p.host.call_count(HostApi::Fetch), 0);

        let log = p.last_log().await;
        assert_eq!(log.action(), AuditAction::Blocked);
        assert_eq!(log.record.details["url"], "https://api.example.com/data");
        assert_eq!(
            p.last_log_reason().await.as_deref(),
            Some("Policy violation: allowNetwork is disabled")
        );
    }

    #[tokio::test]
    async fn test_localhost_preset_storage_allowed_network_denied() {
        let p = Pipeline::new("localhost").await;
        let apis = p.apis();

        assert!(apis.set_item(StorageArea::Local, "theme", "dark").await);
        assert_eq!(
            apis.get_item(StorageArea::Local, "theme").await.as_deref(),
            Some("dark")
        );
        assert!(apis.fetch(FetchRequest::get("http://localhost/api")).await.is_err());
        assert_eq!(p.host.call_count(HostApi::LocalStorage), 2);
    }

    #[tokio::test]
    async fn test_save_then_allow_end_to_end() {
        let p = Pipeline::new("example.com").await;
        p.store
            .save_policy(
                &Origin::new("example.com"),
                Policy::restrictive().allowing(Capability::Network),
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if p.mediator.policy().is_some_and(|pol| pol.allows(Capability::Network)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let resp = p
            .apis()
            .fetch(FetchRequest::get("https://example.com/feed"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(p.last_log().await.action(), AuditAction::Allowed);
    }

    #[tokio::test]
    async fn test_unknown_api_through_gate() {
        let p = Pipeline::new("example.com").await;
        let interceptor = p.page.interceptor().unwrap();

        let permission = interceptor.gate().check("smellovision", json!({})).await;
        assert!(!permission.allowed);
        assert_eq!(p.last_log_reason().await.as_deref(), Some("Unknown API"));
    }

    // ── 2. denial contracts ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_style_denials_return_neutral_values() {
        let p = Pipeline::new("example.com").await;
        let apis = p.apis();

        assert_eq!(apis.get_item(StorageArea::Session, "k").await, None);
        assert!(!apis.set_item(StorageArea::Local, "k", "v").await);
        assert!(!apis.remove_item(StorageArea::Local, "k").await);
        assert!(!apis.clear_storage(StorageArea::Local).await);
        assert_eq!(apis.cookie().await, "");
        assert!(!apis.set_cookie("session=abc").await);
        assert_eq!(
            apis.request_notification_permission().await,
            NotificationPermission::Denied
        );

        assert!(p.host.calls().is_empty(), "denied calls must not reach the host");
        assert_eq!(p.store.log_len(), 7);
    }

    #[tokio::test]
    async fn test_request_style_denials_reject() {
        let p = Pipeline::new("example.com").await;
        let apis = p.apis();

        let media = apis.get_user_media(json!({ "video": true })).await.unwrap_err();
        assert_eq!(media.to_string(), "JADE: Media device permission denied");
        assert!(apis.read_clipboard().await.is_err());
        assert!(apis.write_clipboard("secret").await.is_err());
        assert!(apis.show_notification("hi", "there").await.is_err());
        let rtc = apis.create_peer_connection(json!({})).await.unwrap_err();
        assert!(matches!(rtc, HostError::Blocked { api: "RTCPeerConnection", .. }));

        assert!(p.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_callback_style_denials_use_error_callback() {
        let p = Pipeline::new("example.com").await;
        let apis = p.apis();

        let (ok_tx, mut ok_rx) = oneshot::channel();
        let (err_tx, mut err_rx) = oneshot::channel();
        apis.get_current_position(
            Box::new(move |pos| {
                let _ = ok_tx.send(pos);
            }),
            Some(Box::new(move |e| {
                let _ = err_tx.send(e);
            })),
        )
        .await;
        match err_rx.try_recv().unwrap() {
            HostError::PermissionDenied { code, message } => {
                assert_eq!(code, PERMISSION_DENIED);
                assert_eq!(message, "JADE: Geolocation permission denied");
            }
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
        assert!(ok_rx.try_recv().is_err(), "success callback must not fire");

        // No error callback given: the denial is silent.
        apis.get_current_position(Box::new(|_| panic!("must not be called")), None)
            .await;

        let (err_tx, mut err_rx) = oneshot::channel();
        apis.xhr_send(
            FetchRequest::post("https://t.example/collect", "{}"),
            Box::new(|_| panic!("must not load")),
            Box::new(move |e| {
                let _ = err_tx.send(e);
            }),
        )
        .await;
        assert!(err_rx.try_recv().unwrap().is_denial());
        assert_eq!(p.host.call_count(HostApi::XmlHttpRequest), 0);
    }

    #[tokio::test]
    async fn test_sensitive_denial_raises_alert() {
        let p = Pipeline::new("example.com").await;
        p.apis().set_cookie("a=b").await;
        p.apis().fetch(FetchRequest::get("https://x.example")).await.ok();

        assert_eq!(p.host.alerts(), vec!["Blocked cookie access".to_string()]);
    }

    // ── 3. allowed calls keep host semantics ──────────────────────────────────

    #[tokio::test]
    async fn test_whitelisted_origin_reaches_every_api() {
        let p = Pipeline::new("example.com").await;
        p.store.whitelist(&Origin::new("example.com")).await.unwrap();
        p.mediator.bind(Origin::new("example.com")).await.unwrap();
        let apis = p.apis();

        apis.fetch(FetchRequest::get("https://example.com")).await.unwrap();
        let (tx, mut rx) = oneshot::channel();
        apis.xhr_send(
            FetchRequest::get("https://example.com/x"),
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
            Box::new(|e| panic!("unexpected error {e}")),
        )
        .await;
        assert_eq!(rx.try_recv().unwrap().status, 200);

        assert!(apis.set_item(StorageArea::Session, "k", "v").await);
        assert!(apis.set_cookie("a=1").await);
        assert_eq!(apis.cookie().await, "a=1");
        apis.get_current_position(Box::new(|_| {}), None).await;
        let stream = apis.get_user_media(json!({ "audio": true })).await.unwrap();
        assert!(stream.audio && !stream.video);
        apis.write_clipboard("copied").await.unwrap();
        assert_eq!(apis.read_clipboard().await.unwrap(), "copied");
        assert_eq!(
            apis.request_notification_permission().await,
            NotificationPermission::Granted
        );
        apis.show_notification("done", "").await.unwrap();
        apis.create_peer_connection(json!({})).await.unwrap();

        for api in HostApi::ALL {
            if api != HostApi::LocalStorage {
                assert!(p.host.call_count(api) > 0, "{api} never reached the host");
            }
        }
    }

    /// Host errors on an allowed call pass through unchanged.
    #[tokio::test]
    async fn test_allowed_call_preserves_host_errors() {
        let p = Pipeline::new("google.com").await;
        p.host.set_offline(true);

        let err = p
            .apis()
            .fetch(FetchRequest::get("https://google.com/search"))
            .await
            .unwrap_err();
        assert!(!err.is_denial());
        assert_eq!(err.to_string(), "network error while requesting https://google.com/search");
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_by_id() {
        let p = Pipeline::new("localhost").await;
        let apis = p.apis();

        let (fetch, stored, cookie) = tokio::join!(
            apis.fetch(FetchRequest::get("http://localhost/a")),
            apis.set_item(StorageArea::Local, "k", "v"),
            apis.set_cookie("x=y"),
        );
        assert!(fetch.is_err());
        assert!(stored);
        assert!(!cookie);
        assert_eq!(p.store.log_len(), 3);
    }

    // ── 4. install guard ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let host = Arc::new(MemoryHost::new());
        let page = PageContext::new(host.clone());
        assert!(!page.is_installed());

        // Before install, calls go straight to the host.
        page.apis().fetch(FetchRequest::get("https://a.example")).await.unwrap();
        assert_eq!(host.call_count(HostApi::Fetch), 1);

        let d = Duration::from_secs(2);
        let first = page.install(PermissionGate::new(channel("page", 4, d).0));
        let second = page.install(PermissionGate::new(channel("page", 4, d).0));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(page.is_installed());
    }

    // ── 5. fail-closed gate ───────────────────────────────────────────────────

    /// No answer within 2000 ms: denied once, slot released, mediator told.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_fail_closed_and_reported() {
        let (requester, mut responder) =
            channel::<PageMessage, PermissionResponse>("page", 8, Duration::from_millis(2000));
        let gate = PermissionGate::new(requester);

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let replies = responder.replies();
        tokio::spawn(async move {
            while let Some(message) = responder.recv().await {
                let _ = seen_tx.send(message);
            }
        });

        let permission = gate.check("fetch", json!({ "url": "https://slow.example" })).await;
        assert!(!permission.allowed);
        assert_eq!(gate.in_flight(), 0);

        let request_id = match seen_rx.recv().await.unwrap() {
            PageMessage::PermissionRequest(req) => req.request_id,
            other => panic!("expected request, got {:?}", other),
        };
        match seen_rx.recv().await.unwrap() {
            PageMessage::RequestTimedOut {
                request_id: timed_out,
                capability,
                waited_ms,
            } => {
                assert_eq!(timed_out, request_id);
                assert_eq!(capability, "fetch");
                assert_eq!(waited_ms, 2000);
            }
            other => panic!("expected timeout report, got {:?}", other),
        }

        // A late allow reaches the router and is dropped there.
        assert!(replies.send(PermissionResponse::new(request_id, true, None)).await);
        for _ in 0..100 {
            if gate.late_responses() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gate.late_responses(), 1);
        assert_eq!(gate.in_flight(), 0);

        // The next request is unaffected by the stale answer.
        let next = gate.check("fetch", json!({ "url": "https://fast.example" }));
        let answer = async {
            match seen_rx.recv().await.unwrap() {
                PageMessage::PermissionRequest(req) => {
                    assert_ne!(req.request_id, request_id);
                    replies.send(PermissionResponse::new(req.request_id, true, None)).await;
                }
                other => panic!("expected request, got {:?}", other),
            }
        };
        let (permission, ()) = tokio::join!(next, answer);
        assert!(permission.allowed);
        assert_eq!(gate.late_responses(), 1);
    }

    #[tokio::test]
    async fn test_dead_mediator_denies() {
        let (requester, responder) =
            channel::<PageMessage, PermissionResponse>("page", 8, Duration::from_secs(2));
        drop(responder);
        let gate = PermissionGate::new(requester);

        assert!(!gate.check("localStorage", json!({})).await.allowed);
    }
}
