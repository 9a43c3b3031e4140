//! Pure decision logic: why a request is denied and what the user is told.

use std::fmt;

use serde_json::Value;

use jade_contracts::{
    capability::{Capability, HostApi},
    policy::Policy,
};

/// Why a permission request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Mediation is switched off in configuration.
    Disabled,
    /// No policy is cached for the bound origin.
    NotLoaded,
    /// The API name is not in the capability map.
    UnknownApi,
    /// The API's flag is off and the origin is not whitelisted.
    PolicyViolation(Capability),
    /// The interceptor gave up waiting for a decision.
    Timeout { waited_ms: u64 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Disabled => f.write_str("Mediation disabled"),
            DenyReason::NotLoaded => f.write_str("Policy not loaded"),
            DenyReason::UnknownApi => f.write_str("Unknown API"),
            DenyReason::PolicyViolation(cap) => {
                write!(f, "Policy violation: {} is disabled", cap.flag_name())
            }
            DenyReason::Timeout { waited_ms } => {
                write!(f, "Timeout: no decision within {}ms", waited_ms)
            }
        }
    }
}

/// Evaluate `api` against the mediator state.
///
/// The unknown-API check never looks at the policy, so it applies even
/// before one is loaded.
pub fn evaluate(enabled: bool, api: &str, policy: Option<&Policy>) -> Result<Capability, DenyReason> {
    if !enabled {
        return Err(DenyReason::Disabled);
    }
    let capability = HostApi::parse(api)
        .map_err(|_| DenyReason::UnknownApi)?
        .capability();
    let policy = policy.ok_or(DenyReason::NotLoaded)?;
    policy
        .check(capability)
        .map_err(|_| DenyReason::PolicyViolation(capability))?;
    Ok(capability)
}

/// Text shown for a policy-violation denial of `api`.
pub fn user_message(api: &str, details: &Value) -> String {
    match api {
        "fetch" => format!("Blocked network request to {}", detail(details, "url")),
        "XMLHttpRequest" => format!("Blocked AJAX request to {}", detail(details, "url")),
        "localStorage" => format!(
            "Blocked local storage access for key: {}",
            detail(details, "key")
        ),
        "cookies" => "Blocked cookie access".to_string(),
        "geolocation" => "Blocked location access attempt".to_string(),
        "mediaDevices" => "Blocked camera/microphone access".to_string(),
        "clipboard" => "Blocked clipboard access".to_string(),
        "Notification" => "Blocked notification request".to_string(),
        other => format!("Blocked {} access", other),
    }
}

fn detail(details: &Value, field: &str) -> String {
    match details.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "undefined".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn disabled_wins_over_everything() {
        let mut policy = Policy::restrictive();
        policy.whitelisted = true;
        assert_eq!(evaluate(false, "fetch", Some(&policy)), Err(DenyReason::Disabled));
    }

    #[test]
    fn unknown_api_does_not_need_a_policy() {
        assert_eq!(evaluate(true, "smellovision", None), Err(DenyReason::UnknownApi));
        assert_eq!(evaluate(true, "fetch", None), Err(DenyReason::NotLoaded));
    }

    #[test]
    fn reason_texts() {
        assert_eq!(
            DenyReason::PolicyViolation(Capability::Network).to_string(),
            "Policy violation: allowNetwork is disabled"
        );
        assert_eq!(
            DenyReason::Timeout { waited_ms: 2000 }.to_string(),
            "Timeout: no decision within 2000ms"
        );
    }

    #[test]
    fn user_message_templates() {
        let d = json!({ "url": "https://t.example/x", "key": "token" });
        assert_eq!(user_message("fetch", &d), "Blocked network request to https://t.example/x");
        assert_eq!(user_message("XMLHttpRequest", &d), "Blocked AJAX request to https://t.example/x");
        assert_eq!(user_message("localStorage", &d), "Blocked local storage access for key: token");
        assert_eq!(user_message("RTCPeerConnection", &d), "Blocked RTCPeerConnection access");
        // sessionStorage has no template of its own.
        assert_eq!(user_message("sessionStorage", &d), "Blocked sessionStorage access");
        assert_eq!(user_message("fetch", &json!({})), "Blocked network request to undefined");
    }
}
