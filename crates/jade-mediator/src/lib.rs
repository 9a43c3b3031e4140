//! # jade-mediator
//!
//! One [`Mediator`] per browsing context. It answers the interceptor's
//! permission requests from a cached copy of the bound origin's policy and
//! logs every outcome to the policy store.
//!
//! ## Decision order
//!
//! 1. Mediation disabled → deny, `"Mediation disabled"`.
//! 2. API not in the capability map → deny, `"Unknown API"`. The policy is
//!    not consulted.
//! 3. No policy cached → deny, `"Policy not loaded"`.
//! 4. `whitelisted || capabilities[flag]` → allow, else deny with
//!    `"Policy violation: <flag> is disabled"` and a per-API user message.
//!
//! Each decision writes exactly one audit record.

pub mod detect;
pub mod mediator;
pub mod verdict;

pub use detect::{Detection, ElementSnapshot, InlineStyle};
pub use mediator::{Decision, Mediator, RESTRICTIVE_CSP};
pub use verdict::DenyReason;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;

    use jade_contracts::{
        capability::{Capability, HostApi},
        config::{JadeConfig, MediatorConfig},
        event::AuditAction,
        message::{PageMessage, PermissionRequest, PermissionResponse, RequestId},
        origin::Origin,
        policy::Policy,
    };
    use jade_core::channel::channel;
    use jade_policy::{connect, MemoryStorage, PolicyStore};

    use crate::{DenyReason, Detection, ElementSnapshot, InlineStyle, Mediator, RESTRICTIVE_CSP};

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn store() -> Arc<PolicyStore> {
        PolicyStore::init(Arc::new(MemoryStorage::new()), &JadeConfig::default())
            .await
            .unwrap()
    }

    fn unbound(store: &Arc<PolicyStore>, origin: &str, config: MediatorConfig) -> Arc<Mediator> {
        Mediator::start(connect(store, Duration::from_secs(2)), Origin::new(origin), config)
    }

    async fn bound(store: &Arc<PolicyStore>, origin: &str) -> Arc<Mediator> {
        let mediator = unbound(store, origin, MediatorConfig::default());
        mediator.bind(Origin::new(origin)).await.unwrap();
        mediator
    }

    /// Poll until `cond` holds; pushes arrive on a separate task.
    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 1s");
    }

    // ── 1. named scenarios ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_example_com_default_denies_fetch() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        let decision = mediator
            .decide("fetch", json!({ "url": "https://api.example.com/data", "method": "GET" }))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::PolicyViolation(Capability::Network)));

        let logs = store.query_logs(Some(1)).await.unwrap();
        assert_eq!(logs[0].action(), AuditAction::Blocked);
        assert_eq!(
            logs[0].record.reason.as_deref(),
            Some("Policy violation: allowNetwork is disabled")
        );
        assert_eq!(
            logs[0].record.user_message.as_deref(),
            Some("Blocked network request to https://api.example.com/data")
        );
    }

    #[tokio::test]
    async fn test_localhost_preset() {
        let store = store().await;
        let mediator = bound(&store, "localhost").await;

        assert!(mediator.decide("localStorage", json!({ "key": "k" })).await.allowed);
        assert!(!mediator.decide("fetch", json!({})).await.allowed);
        assert_eq!(mediator.policy().unwrap().risk_score, 10);
    }

    #[tokio::test]
    async fn test_save_then_allow() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        store
            .save_policy(
                &Origin::new("example.com"),
                Policy::restrictive().allowing(Capability::Network),
            )
            .await
            .unwrap();
        eventually(|| mediator.policy().is_some_and(|p| p.allows(Capability::Network))).await;

        let decision = mediator.decide("fetch", json!({})).await;
        assert!(decision.allowed);
        assert_eq!(store.query_logs(Some(1)).await.unwrap()[0].action(), AuditAction::Allowed);
    }

    #[tokio::test]
    async fn test_unknown_api_always_denied() {
        let store = store().await;
        let origin = Origin::new("example.com");
        let mut policy = Policy::restrictive();
        policy.whitelisted = true;
        store.save_policy(&origin, policy).await.unwrap();
        let mediator = bound(&store, "example.com").await;

        let decision = mediator.decide("smellovision", json!({})).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::UnknownApi));
        assert_eq!(decision.user_message, None);
        assert_eq!(store.query_logs(Some(1)).await.unwrap()[0].record.reason.as_deref(), Some("Unknown API"));
    }

    // ── 2. decision properties ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_whitelist_allows_every_mapped_api() {
        let store = store().await;
        store.whitelist(&Origin::new("example.com")).await.unwrap();
        let mediator = bound(&store, "example.com").await;

        for api in HostApi::ALL {
            assert!(mediator.decide(api.name(), json!({})).await.allowed, "{api} denied");
        }
    }

    #[tokio::test]
    async fn test_one_event_per_decision() {
        let store = store().await;
        let mediator = bound(&store, "localhost").await;
        let calls = ["fetch", "localStorage", "smellovision", "cookies", "sessionStorage"];

        for (i, api) in calls.iter().enumerate() {
            let decision = mediator.decide(api, json!({})).await;
            assert_eq!(store.log_len(), i + 1);

            let event = decision.event.expect("event logged");
            let expected = if decision.allowed {
                AuditAction::Allowed
            } else {
                AuditAction::Blocked
            };
            assert_eq!(event.action(), expected);
            assert_eq!(event.record.capability, *api);
        }
    }

    #[tokio::test]
    async fn test_disabled_mediator_denies_and_logs() {
        let store = store().await;
        let config = MediatorConfig {
            enabled: false,
            ..MediatorConfig::default()
        };
        let mediator = unbound(&store, "localhost", config);
        mediator.bind(Origin::new("localhost")).await.unwrap();

        let decision = mediator.decide("localStorage", json!({})).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::Disabled));
        assert_eq!(store.log_len(), 1);
    }

    #[tokio::test]
    async fn test_decide_before_bind_is_denied() {
        let store = store().await;
        let mediator = unbound(&store, "localhost", MediatorConfig::default());

        let decision = mediator.decide("localStorage", json!({})).await;
        assert_eq!(decision.reason, Some(DenyReason::NotLoaded));
        assert_eq!(
            store.query_logs(Some(1)).await.unwrap()[0].record.reason.as_deref(),
            Some("Policy not loaded")
        );
    }

    #[tokio::test]
    async fn test_notify_only_for_sensitive_apis() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        let geo = mediator.decide("geolocation", json!({})).await;
        assert!(geo.notify);
        let response = geo.response(RequestId::new());
        assert_eq!(response.notice.as_deref(), Some("Blocked location access attempt"));

        let fetch = mediator.decide("fetch", json!({})).await;
        assert!(!fetch.notify);
        assert_eq!(fetch.response(RequestId::new()).notice, None);
    }

    // ── 3. binding lifecycle ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_update_for_other_origin_is_ignored() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        let applied = mediator.on_policy_updated(
            &Origin::new("other.com"),
            Policy::restrictive().allowing(Capability::Network),
        );
        assert!(!applied);
        assert!(!mediator.policy().unwrap().allows(Capability::Network));
    }

    /// A snapshot taken before an update keeps its old value.
    #[tokio::test]
    async fn test_update_replaces_cache_atomically() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;
        let before = mediator.policy().unwrap();

        mediator.on_policy_updated(
            &Origin::new("example.com"),
            Policy::restrictive().allowing(Capability::Camera),
        );
        assert!(!before.allows(Capability::Camera));
        assert!(mediator.policy().unwrap().allows(Capability::Camera));
    }

    #[tokio::test]
    async fn test_navigation_rebinds_only_on_origin_change() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        assert!(!mediator.on_context_navigated("https://www.example.com/other").await.unwrap());
        assert!(mediator.on_context_navigated("http://localhost:8080/app").await.unwrap());

        assert_eq!(mediator.origin(), Origin::new("localhost"));
        assert!(mediator.policy().unwrap().allows(Capability::Storage));
        assert_eq!(store.subscriber_count(&Origin::new("example.com")), 0);
        assert_eq!(store.subscriber_count(&Origin::new("localhost")), 1);
    }

    #[tokio::test]
    async fn test_unbind_drops_cache_and_subscription() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;
        assert_eq!(store.subscriber_count(&Origin::new("example.com")), 1);

        mediator.unbind().await.unwrap();
        assert!(mediator.policy().is_none());
        assert_eq!(store.subscriber_count(&Origin::new("example.com")), 0);

        let decision = mediator.decide("fetch", json!({})).await;
        assert_eq!(decision.reason, Some(DenyReason::NotLoaded));
    }

    /// An update queued before the unsubscribe landed must not refill the
    /// cache; a later bind accepts updates again.
    #[tokio::test]
    async fn test_update_after_unbind_is_ignored() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;
        mediator.unbind().await.unwrap();

        let applied = mediator.on_policy_updated(
            &Origin::new("example.com"),
            Policy::restrictive().allowing(Capability::Network),
        );
        assert!(!applied);
        assert!(mediator.policy().is_none());
        assert_eq!(
            mediator.decide("fetch", json!({})).await.reason,
            Some(DenyReason::NotLoaded)
        );

        mediator.bind(Origin::new("example.com")).await.unwrap();
        assert!(mediator.on_policy_updated(
            &Origin::new("example.com"),
            Policy::restrictive().allowing(Capability::Network),
        ));
        assert!(mediator.policy().unwrap().allows(Capability::Network));
    }

    #[tokio::test]
    async fn test_dropped_mediator_releases_subscription() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;
        drop(mediator);

        let origin = Origin::new("example.com");
        eventually(|| store.subscriber_count(&origin) == 0).await;
    }

    // ── 4. supplementary behavior ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_csp_follows_network_flag() {
        let store = store().await;
        assert_eq!(
            bound(&store, "example.com").await.content_security_policy(),
            Some(RESTRICTIVE_CSP)
        );
        assert_eq!(bound(&store, "google.com").await.content_security_policy(), None);
    }

    #[tokio::test]
    async fn test_record_timeout_logs_blocked() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        let event = mediator.record_timeout(RequestId::new(), "fetch", 2000).await.unwrap();
        assert_eq!(event.action(), AuditAction::Blocked);
        assert_eq!(event.record.reason.as_deref(), Some("Timeout: no decision within 2000ms"));
    }

    #[tokio::test]
    async fn test_inspect_element_detections() {
        let store = store().await;
        let mediator = bound(&store, "example.com").await;

        let pixel = ElementSnapshot::new("img", "https://t.example/p.gif").with_style(InlineStyle {
            width: "0px".to_string(),
            ..InlineStyle::default()
        });
        assert_eq!(mediator.inspect_element(&pixel).await, Some(Detection::TrackingPixel));

        let frame = ElementSnapshot::new("IFRAME", "https://t.example/f").with_style(InlineStyle {
            display: "none".to_string(),
            ..InlineStyle::default()
        });
        assert_eq!(mediator.inspect_element(&frame).await, Some(Detection::HiddenIframe));

        // Transparent iframes and visible images are not flagged.
        let faint = ElementSnapshot::new("IFRAME", "").with_style(InlineStyle {
            opacity: "0".to_string(),
            ..InlineStyle::default()
        });
        assert_eq!(mediator.inspect_element(&faint).await, None);
        assert_eq!(mediator.inspect_element(&ElementSnapshot::new("IMG", "a.png")).await, None);

        let logs = store.query_logs(None).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|e| e.action() == AuditAction::Detected));
        assert_eq!(logs[0].record.reason.as_deref(), Some("Hidden iframe detected"));
        assert_eq!(logs[1].record.details["element"], "IMG");
    }

    // ── 5. page channel ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_serve_answers_by_request_id() {
        let store = store().await;
        let mediator = bound(&store, "localhost").await;
        let (page, responder) =
            channel::<PageMessage, PermissionResponse>("page", 8, Duration::from_secs(2));
        tokio::spawn(Arc::clone(&mediator).serve(responder));

        let allowed = page
            .request(|id| {
                PageMessage::PermissionRequest(PermissionRequest::new(id, "localStorage", json!({})))
            })
            .await
            .unwrap();
        assert!(allowed.allowed);

        let denied = page
            .request(|id| {
                PageMessage::PermissionRequest(PermissionRequest::new(id, "cookies", json!({})))
            })
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.notice.as_deref(), Some("Blocked cookie access"));

        assert!(page.notify(PageMessage::RequestTimedOut {
            request_id: RequestId::new(),
            capability: "fetch".to_string(),
            waited_ms: 2000,
        }));
        eventually(|| store.log_len() == 3).await;
    }
}
