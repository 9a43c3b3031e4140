//! Per-origin policy documents.
//!
//! A `Policy` is deny-by-default: every capability flag starts `false` and
//! only `whitelisted = true` overrides the individual flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    capability::Capability,
    error::{JadeError, JadeResult},
    origin::Origin,
};

/// Upper bound of a policy's `riskScore`.
pub const MAX_RISK_SCORE: u8 = 100;

/// The ten capability switches of a policy.
///
/// Serialized as a flat object keyed by flag name. Missing keys deserialize
/// as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityFlags {
    #[serde(rename = "allowNetwork")]
    pub network: bool,
    #[serde(rename = "allowStorage")]
    pub storage: bool,
    #[serde(rename = "allowDOM")]
    pub dom: bool,
    #[serde(rename = "allowCookies")]
    pub cookies: bool,
    #[serde(rename = "allowGeolocation")]
    pub geolocation: bool,
    #[serde(rename = "allowCamera")]
    pub camera: bool,
    #[serde(rename = "allowMicrophone")]
    pub microphone: bool,
    #[serde(rename = "allowNotifications")]
    pub notifications: bool,
    #[serde(rename = "allowClipboard")]
    pub clipboard: bool,
    #[serde(rename = "allowWebRTC")]
    pub webrtc: bool,
}

impl CapabilityFlags {
    pub fn get(&self, capability: Capability) -> bool {
        match capability {
            Capability::Network => self.network,
            Capability::Storage => self.storage,
            Capability::Dom => self.dom,
            Capability::Cookies => self.cookies,
            Capability::Geolocation => self.geolocation,
            Capability::Camera => self.camera,
            Capability::Microphone => self.microphone,
            Capability::Notifications => self.notifications,
            Capability::Clipboard => self.clipboard,
            Capability::WebRtc => self.webrtc,
        }
    }

    pub fn set(&mut self, capability: Capability, value: bool) {
        let slot = match capability {
            Capability::Network => &mut self.network,
            Capability::Storage => &mut self.storage,
            Capability::Dom => &mut self.dom,
            Capability::Cookies => &mut self.cookies,
            Capability::Geolocation => &mut self.geolocation,
            Capability::Camera => &mut self.camera,
            Capability::Microphone => &mut self.microphone,
            Capability::Notifications => &mut self.notifications,
            Capability::Clipboard => &mut self.clipboard,
            Capability::WebRtc => &mut self.webrtc,
        };
        *slot = value;
    }

    /// Capabilities currently switched on.
    pub fn granted(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.get(*c))
    }
}

/// The access policy for one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Grants every capability regardless of `capabilities`.
    #[serde(default)]
    pub whitelisted: bool,
    /// Informational only. Authoritative scores are derived from the audit
    /// log at listing time.
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Policy {
    /// The all-`false`, non-whitelisted policy used for unknown origins.
    pub fn restrictive() -> Self {
        Self {
            capabilities: CapabilityFlags::default(),
            whitelisted: false,
            risk_score: 0,
            last_updated: Utc::now(),
        }
    }

    /// Builder helper: switch one capability on.
    pub fn allowing(mut self, capability: Capability) -> Self {
        self.capabilities.set(capability, true);
        self
    }

    /// True if this policy lets `capability` through.
    pub fn allows(&self, capability: Capability) -> bool {
        self.whitelisted || self.capabilities.get(capability)
    }

    /// `Ok` if `capability` is allowed, else `PolicyViolation` naming its flag.
    pub fn check(&self, capability: Capability) -> JadeResult<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(JadeError::PolicyViolation {
                flag: capability.flag_name().to_string(),
            })
        }
    }

    /// Reject a `risk_score` outside `0..=MAX_RISK_SCORE`.
    pub fn validate(&self) -> JadeResult<()> {
        if self.risk_score > MAX_RISK_SCORE {
            return Err(JadeError::MalformedRequest {
                reason: format!(
                    "riskScore {} is outside 0..={}",
                    self.risk_score, MAX_RISK_SCORE
                ),
            });
        }
        Ok(())
    }

    /// True if both policies grant exactly the same access, ignoring the
    /// derived `risk_score` and the `last_updated` stamp.
    pub fn same_grants(&self, other: &Policy) -> bool {
        self.capabilities == other.capabilities && self.whitelisted == other.whitelisted
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::restrictive()
    }
}

/// One row of the policy listing: the stored policy plus a freshly computed
/// risk score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub origin: Origin,
    pub policy: Policy,
    pub risk_score: u8,
}
