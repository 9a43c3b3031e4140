//! Guarded wrappers over every host API, and the install-once page guard.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use jade_contracts::capability::HostApi;

use crate::{
    error::HostError,
    gate::PermissionGate,
    host::{
        Callback, FetchRequest, FetchResponse, Host, MediaStream, NotificationPermission,
        PeerConnection, Position, StorageArea,
    },
};

const NETWORK_BLOCKED: &str = "JADE: Network request blocked by policy";
const XHR_BLOCKED: &str = "JADE: AJAX request blocked by policy";
const GEOLOCATION_DENIED: &str = "JADE: Geolocation permission denied";
const MEDIA_DENIED: &str = "JADE: Media device permission denied";
const CLIPBOARD_BLOCKED: &str = "JADE: Clipboard access blocked by policy";
const NOTIFICATION_BLOCKED: &str = "JADE: Notification blocked by policy";
const WEBRTC_BLOCKED: &str = "JADE: WebRTC connection blocked by policy";

/// A `Host` that asks the mediator before every primitive call.
///
/// Allowed calls go to the original host untouched, so return values and
/// host errors are exactly what page code would have seen without it.
pub struct Interceptor {
    original: Arc<dyn Host>,
    gate: PermissionGate,
}

impl Interceptor {
    pub fn new(original: Arc<dyn Host>, gate: PermissionGate) -> Self {
        Self { original, gate }
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    async fn permit(&self, api: HostApi, details: Value) -> bool {
        let permission = self.gate.check(api.name(), details).await;
        if let Some(notice) = &permission.notice {
            self.original.show_alert(notice);
        }
        if !permission.allowed {
            debug!(api = api.name(), "call denied by interceptor");
        }
        permission.allowed
    }

    async fn permit_storage(&self, area: StorageArea, operation: &str, key: Option<&str>) -> bool {
        self.permit(
            area.api(),
            json!({ "operation": operation, "key": key, "type": "storage" }),
        )
        .await
    }
}

fn network_details(request: &FetchRequest) -> Value {
    json!({ "url": request.url, "method": request.method, "type": "network" })
}

#[async_trait]
impl Host for Interceptor {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HostError> {
        if !self.permit(HostApi::Fetch, network_details(&request)).await {
            return Err(HostError::blocked(HostApi::Fetch.name(), NETWORK_BLOCKED));
        }
        self.original.fetch(request).await
    }

    async fn xhr_send(
        &self,
        request: FetchRequest,
        on_load: Callback<FetchResponse>,
        on_error: Callback<HostError>,
    ) {
        if !self
            .permit(HostApi::XmlHttpRequest, network_details(&request))
            .await
        {
            on_error(HostError::blocked(HostApi::XmlHttpRequest.name(), XHR_BLOCKED));
            return;
        }
        self.original.xhr_send(request, on_load, on_error).await
    }

    async fn get_item(&self, area: StorageArea, key: &str) -> Option<String> {
        if !self.permit_storage(area, "getItem", Some(key)).await {
            return None;
        }
        self.original.get_item(area, key).await
    }

    async fn set_item(&self, area: StorageArea, key: &str, value: &str) -> bool {
        if !self.permit_storage(area, "setItem", Some(key)).await {
            return false;
        }
        self.original.set_item(area, key, value).await
    }

    async fn remove_item(&self, area: StorageArea, key: &str) -> bool {
        if !self.permit_storage(area, "removeItem", Some(key)).await {
            return false;
        }
        self.original.remove_item(area, key).await
    }

    async fn clear_storage(&self, area: StorageArea) -> bool {
        if !self.permit_storage(area, "clear", None).await {
            return false;
        }
        self.original.clear_storage(area).await
    }

    async fn cookie(&self) -> String {
        let details = json!({ "operation": "get", "type": "storage" });
        if !self.permit(HostApi::Cookies, details).await {
            return String::new();
        }
        self.original.cookie().await
    }

    async fn set_cookie(&self, value: &str) -> bool {
        let details = json!({ "operation": "set", "value": value, "type": "storage" });
        if !self.permit(HostApi::Cookies, details).await {
            return false;
        }
        self.original.set_cookie(value).await
    }

    async fn get_current_position(
        &self,
        on_success: Callback<Position>,
        on_error: Option<Callback<HostError>>,
    ) {
        let details = json!({ "operation": "getCurrentPosition", "type": "sensor" });
        if !self.permit(HostApi::Geolocation, details).await {
            if let Some(on_error) = on_error {
                on_error(HostError::permission_denied(GEOLOCATION_DENIED));
            }
            return;
        }
        self.original.get_current_position(on_success, on_error).await
    }

    async fn get_user_media(&self, constraints: Value) -> Result<MediaStream, HostError> {
        let details = json!({
            "operation": "getUserMedia",
            "constraints": constraints,
            "type": "sensor",
        });
        if !self.permit(HostApi::MediaDevices, details).await {
            return Err(HostError::blocked(HostApi::MediaDevices.name(), MEDIA_DENIED));
        }
        self.original.get_user_media(constraints).await
    }

    async fn read_clipboard(&self) -> Result<String, HostError> {
        let details = json!({ "operation": "readText", "type": "clipboard" });
        if !self.permit(HostApi::Clipboard, details).await {
            return Err(HostError::blocked(HostApi::Clipboard.name(), CLIPBOARD_BLOCKED));
        }
        self.original.read_clipboard().await
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        let details = json!({ "operation": "writeText", "type": "clipboard" });
        if !self.permit(HostApi::Clipboard, details).await {
            return Err(HostError::blocked(HostApi::Clipboard.name(), CLIPBOARD_BLOCKED));
        }
        self.original.write_clipboard(text).await
    }

    async fn request_notification_permission(&self) -> NotificationPermission {
        let details = json!({ "operation": "requestPermission", "type": "notification" });
        if !self.permit(HostApi::Notification, details).await {
            return NotificationPermission::Denied;
        }
        self.original.request_notification_permission().await
    }

    async fn show_notification(&self, title: &str, body: &str) -> Result<(), HostError> {
        let details = json!({ "operation": "show", "title": title, "type": "notification" });
        if !self.permit(HostApi::Notification, details).await {
            return Err(HostError::blocked(
                HostApi::Notification.name(),
                NOTIFICATION_BLOCKED,
            ));
        }
        self.original.show_notification(title, body).await
    }

    async fn create_peer_connection(&self, config: Value) -> Result<PeerConnection, HostError> {
        let details = json!({ "operation": "create", "type": "network" });
        if !self.permit(HostApi::RtcPeerConnection, details).await {
            return Err(HostError::blocked(
                HostApi::RtcPeerConnection.name(),
                WEBRTC_BLOCKED,
            ));
        }
        self.original.create_peer_connection(config).await
    }

    fn show_alert(&self, message: &str) {
        self.original.show_alert(message);
    }
}

// ── Page ─────────────────────────────────────────────────────────────────────

/// One page's live API binding.
///
/// Starts out pointing at the original host. `install` swaps in an
/// interceptor at most once; later installs are no-ops that return the
/// existing one.
pub struct PageContext {
    original: Arc<dyn Host>,
    installed: OnceLock<Arc<Interceptor>>,
}

impl PageContext {
    pub fn new(original: Arc<dyn Host>) -> Self {
        Self {
            original,
            installed: OnceLock::new(),
        }
    }

    /// Install the interceptor. The original host is captured here, before
    /// the live binding is replaced.
    pub fn install(&self, gate: PermissionGate) -> Arc<Interceptor> {
        let mut fresh = false;
        let interceptor = self.installed.get_or_init(|| {
            fresh = true;
            Arc::new(Interceptor::new(Arc::clone(&self.original), gate))
        });
        if fresh {
            info!("interceptor installed");
        } else {
            debug!("interceptor already installed, ignoring");
        }
        Arc::clone(interceptor)
    }

    pub fn is_installed(&self) -> bool {
        self.installed.get().is_some()
    }

    pub fn interceptor(&self) -> Option<Arc<Interceptor>> {
        self.installed.get().cloned()
    }

    /// What page code calls through right now.
    pub fn apis(&self) -> Arc<dyn Host> {
        match self.installed.get() {
            Some(interceptor) => Arc::clone(interceptor) as Arc<dyn Host>,
            None => Arc::clone(&self.original),
        }
    }
}
