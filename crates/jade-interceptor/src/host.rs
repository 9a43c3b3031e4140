//! The page runtime's primitive APIs.
//!
//! `Host` is the live binding page code calls through. The runtime provides
//! the native binding; the interceptor provides a wrapper that
//! implements the same trait, so page code cannot tell which one it holds.
//!
//! API styles:
//!
//! - request-style (`fetch`, media, clipboard, notifications, WebRTC)
//!   return `Result` and fail with `HostError::Blocked` on denial;
//! - read-style (storage, cookies, notification permission) return a
//!   neutral value on denial;
//! - callback-style (XHR, geolocation) report denial through the caller's
//!   error callback.

use async_trait::async_trait;
use serde_json::Value;

use jade_contracts::capability::HostApi;

use crate::error::HostError;

/// One-shot completion callback.
pub type Callback<T> = Box<dyn FnOnce(T) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            body: None,
        }
    }

    pub fn post(url: &str, body: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "POST".to_string(),
            body: Some(body.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Local,
    Session,
}

impl StorageArea {
    pub fn api(self) -> HostApi {
        match self {
            StorageArea::Local => HostApi::LocalStorage,
            StorageArea::Session => HostApi::SessionStorage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    pub id: String,
}

#[async_trait]
pub trait Host: Send + Sync {
    // ── Network ──────────────────────────────────────────────────────────────

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HostError>;

    async fn xhr_send(
        &self,
        request: FetchRequest,
        on_load: Callback<FetchResponse>,
        on_error: Callback<HostError>,
    );

    // ── Storage ──────────────────────────────────────────────────────────────

    async fn get_item(&self, area: StorageArea, key: &str) -> Option<String>;

    /// Returns `false` when nothing was written.
    async fn set_item(&self, area: StorageArea, key: &str, value: &str) -> bool;

    async fn remove_item(&self, area: StorageArea, key: &str) -> bool;

    async fn clear_storage(&self, area: StorageArea) -> bool;

    // ── Cookies ──────────────────────────────────────────────────────────────

    async fn cookie(&self) -> String;

    /// Returns `false` when the cookie was not set.
    async fn set_cookie(&self, value: &str) -> bool;

    // ── Sensors ──────────────────────────────────────────────────────────────

    async fn get_current_position(
        &self,
        on_success: Callback<Position>,
        on_error: Option<Callback<HostError>>,
    );

    async fn get_user_media(&self, constraints: Value) -> Result<MediaStream, HostError>;

    // ── Clipboard ────────────────────────────────────────────────────────────

    async fn read_clipboard(&self) -> Result<String, HostError>;

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError>;

    // ── Notifications ────────────────────────────────────────────────────────

    async fn request_notification_permission(&self) -> NotificationPermission;

    async fn show_notification(&self, title: &str, body: &str) -> Result<(), HostError>;

    // ── WebRTC ───────────────────────────────────────────────────────────────

    async fn create_peer_connection(&self, config: Value) -> Result<PeerConnection, HostError>;

    // ── Page chrome ──────────────────────────────────────────────────────────

    /// Show a security alert to the user. Hosts without UI ignore it.
    fn show_alert(&self, _message: &str) {}
}
