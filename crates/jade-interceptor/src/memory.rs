//! In-memory `Host`.
//!
//! `MemoryHost` stands in for a page runtime. It keeps storage, cookies and
//! the clipboard in memory and records every primitive call by API name, so
//! callers can check whether a denied request ever reached the host.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use serde_json::Value;

use jade_contracts::capability::HostApi;

use crate::{
    error::HostError,
    host::{
        Callback, FetchRequest, FetchResponse, Host, MediaStream, NotificationPermission,
        PeerConnection, Position, StorageArea,
    },
};

#[derive(Debug, Default)]
struct State {
    calls: Vec<&'static str>,
    local: HashMap<String, String>,
    session: HashMap<String, String>,
    cookies: Vec<String>,
    clipboard: String,
    notifications: Vec<String>,
    alerts: Vec<String>,
    next_id: u64,
}

impl State {
    fn area(&mut self, area: StorageArea) -> &mut HashMap<String, String> {
        match area {
            StorageArea::Local => &mut self.local,
            StorageArea::Session => &mut self.session,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make network calls fail like a dropped connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// API names of every primitive call so far, oldest first.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, api: HostApi) -> usize {
        self.state().calls.iter().filter(|c| **c == api.name()).count()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state().alerts.clone()
    }

    /// Titles of notifications shown so far.
    pub fn notifications(&self) -> Vec<String> {
        self.state().notifications.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, api: HostApi) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(api.name());
        state
    }

    fn network(&self, request: &FetchRequest) -> Result<FetchResponse, HostError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(HostError::Failed(format!(
                "network error while requesting {}",
                request.url
            )));
        }
        Ok(FetchResponse {
            status: 200,
            body: format!("{} {}", request.method, request.url),
        })
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HostError> {
        drop(self.record(HostApi::Fetch));
        self.network(&request)
    }

    async fn xhr_send(
        &self,
        request: FetchRequest,
        on_load: Callback<FetchResponse>,
        on_error: Callback<HostError>,
    ) {
        drop(self.record(HostApi::XmlHttpRequest));
        match self.network(&request) {
            Ok(response) => on_load(response),
            Err(e) => on_error(e),
        }
    }

    async fn get_item(&self, area: StorageArea, key: &str) -> Option<String> {
        self.record(area.api()).area(area).get(key).cloned()
    }

    async fn set_item(&self, area: StorageArea, key: &str, value: &str) -> bool {
        self.record(area.api())
            .area(area)
            .insert(key.to_string(), value.to_string());
        true
    }

    async fn remove_item(&self, area: StorageArea, key: &str) -> bool {
        self.record(area.api()).area(area).remove(key);
        true
    }

    async fn clear_storage(&self, area: StorageArea) -> bool {
        self.record(area.api()).area(area).clear();
        true
    }

    async fn cookie(&self) -> String {
        self.record(HostApi::Cookies).cookies.join("; ")
    }

    async fn set_cookie(&self, value: &str) -> bool {
        self.record(HostApi::Cookies).cookies.push(value.to_string());
        true
    }

    async fn get_current_position(
        &self,
        on_success: Callback<Position>,
        _on_error: Option<Callback<HostError>>,
    ) {
        drop(self.record(HostApi::Geolocation));
        on_success(Position {
            latitude: 51.5074,
            longitude: -0.1278,
            accuracy: 25.0,
        });
    }

    async fn get_user_media(&self, constraints: Value) -> Result<MediaStream, HostError> {
        let id = self.record(HostApi::MediaDevices).next_id("stream");
        Ok(MediaStream {
            id,
            audio: constraints.get("audio").and_then(Value::as_bool).unwrap_or(false),
            video: constraints.get("video").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn read_clipboard(&self) -> Result<String, HostError> {
        Ok(self.record(HostApi::Clipboard).clipboard.clone())
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        self.record(HostApi::Clipboard).clipboard = text.to_string();
        Ok(())
    }

    async fn request_notification_permission(&self) -> NotificationPermission {
        drop(self.record(HostApi::Notification));
        NotificationPermission::Granted
    }

    async fn show_notification(&self, title: &str, _body: &str) -> Result<(), HostError> {
        self.record(HostApi::Notification)
            .notifications
            .push(title.to_string());
        Ok(())
    }

    async fn create_peer_connection(&self, _config: Value) -> Result<PeerConnection, HostError> {
        let id = self.record(HostApi::RtcPeerConnection).next_id("pc");
        Ok(PeerConnection { id })
    }

    fn show_alert(&self, message: &str) {
        self.state().alerts.push(message.to_string());
    }
}
