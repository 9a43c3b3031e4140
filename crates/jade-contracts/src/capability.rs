//! Capability flags and the host APIs that map onto them.
//!
//! A `Capability` is one policy switch (network, storage, ...). A `HostApi`
//! is one concrete page-facing API the interceptor wraps. Several APIs may
//! share a capability (`fetch` and `XMLHttpRequest` both need the network).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{JadeError, JadeResult};

/// One controllable permission in a policy.
///
/// The serialized form is the policy flag name (e.g. `"allowNetwork"`), which
/// is also what denial reasons and audit entries refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "allowNetwork")]
    Network,
    #[serde(rename = "allowStorage")]
    Storage,
    #[serde(rename = "allowDOM")]
    Dom,
    #[serde(rename = "allowCookies")]
    Cookies,
    #[serde(rename = "allowGeolocation")]
    Geolocation,
    #[serde(rename = "allowCamera")]
    Camera,
    #[serde(rename = "allowMicrophone")]
    Microphone,
    #[serde(rename = "allowNotifications")]
    Notifications,
    #[serde(rename = "allowClipboard")]
    Clipboard,
    #[serde(rename = "allowWebRTC")]
    WebRtc,
}

impl Capability {
    /// Every capability, in policy-document order.
    pub const ALL: [Capability; 10] = [
        Capability::Network,
        Capability::Storage,
        Capability::Dom,
        Capability::Cookies,
        Capability::Geolocation,
        Capability::Camera,
        Capability::Microphone,
        Capability::Notifications,
        Capability::Clipboard,
        Capability::WebRtc,
    ];

    /// The policy flag name, e.g. `"allowWebRTC"`.
    pub fn flag_name(self) -> &'static str {
        match self {
            Capability::Network => "allowNetwork",
            Capability::Storage => "allowStorage",
            Capability::Dom => "allowDOM",
            Capability::Cookies => "allowCookies",
            Capability::Geolocation => "allowGeolocation",
            Capability::Camera => "allowCamera",
            Capability::Microphone => "allowMicrophone",
            Capability::Notifications => "allowNotifications",
            Capability::Clipboard => "allowClipboard",
            Capability::WebRtc => "allowWebRTC",
        }
    }

    /// Inverse of [`Capability::flag_name`]. Exact, case-sensitive match.
    pub fn from_flag_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.flag_name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

/// A page-facing API wrapped by the interceptor.
///
/// Requests cross the channel by name (a plain string) so that a page can
/// ask about an API this build does not know; the mediator resolves the name
/// with [`HostApi::from_name`] and denies anything unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostApi {
    Fetch,
    XmlHttpRequest,
    LocalStorage,
    SessionStorage,
    Cookies,
    Geolocation,
    MediaDevices,
    Clipboard,
    Notification,
    RtcPeerConnection,
}

impl HostApi {
    pub const ALL: [HostApi; 10] = [
        HostApi::Fetch,
        HostApi::XmlHttpRequest,
        HostApi::LocalStorage,
        HostApi::SessionStorage,
        HostApi::Cookies,
        HostApi::Geolocation,
        HostApi::MediaDevices,
        HostApi::Clipboard,
        HostApi::Notification,
        HostApi::RtcPeerConnection,
    ];

    /// The API name as it travels in a permission request.
    pub fn name(self) -> &'static str {
        match self {
            HostApi::Fetch => "fetch",
            HostApi::XmlHttpRequest => "XMLHttpRequest",
            HostApi::LocalStorage => "localStorage",
            HostApi::SessionStorage => "sessionStorage",
            HostApi::Cookies => "cookies",
            HostApi::Geolocation => "geolocation",
            HostApi::MediaDevices => "mediaDevices",
            HostApi::Clipboard => "clipboard",
            HostApi::Notification => "Notification",
            HostApi::RtcPeerConnection => "RTCPeerConnection",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|api| api.name() == name)
    }

    /// Like [`HostApi::from_name`], failing with `UnknownCapability`.
    pub fn parse(name: &str) -> JadeResult<Self> {
        Self::from_name(name).ok_or_else(|| JadeError::UnknownCapability {
            api: name.to_string(),
        })
    }

    /// The policy flag that gates this API.
    ///
    /// `mediaDevices` is gated by the camera flag alone; the microphone flag
    /// has no API mapped to it.
    pub fn capability(self) -> Capability {
        match self {
            HostApi::Fetch | HostApi::XmlHttpRequest => Capability::Network,
            HostApi::LocalStorage | HostApi::SessionStorage => Capability::Storage,
            HostApi::Cookies => Capability::Cookies,
            HostApi::Geolocation => Capability::Geolocation,
            HostApi::MediaDevices => Capability::Camera,
            HostApi::Clipboard => Capability::Clipboard,
            HostApi::Notification => Capability::Notifications,
            HostApi::RtcPeerConnection => Capability::WebRtc,
        }
    }
}

impl fmt::Display for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
