//! TOML configuration for the whole pipeline.
//!
//! Every field has a default, so an empty document is a valid config.
//!
//! ```toml
//! [store]
//! max_logs = 1000
//! persisted_logs = 100
//!
//! [interceptor]
//! decision_timeout_ms = 2000
//!
//! [[presets]]
//! origin = "localhost"
//! allow = ["allowDOM", "allowStorage"]
//! risk_score = 10
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    capability::Capability,
    error::{JadeError, JadeResult},
    origin::Origin,
    policy::Policy,
};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JadeConfig {
    pub store: StoreConfig,
    pub mediator: MediatorConfig,
    pub interceptor: InterceptorConfig,
    /// Replaces the built-in preset table when non-empty.
    pub presets: Vec<PresetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// In-memory audit log capacity.
    pub max_logs: usize,
    /// How many of the most recent events are written on every append.
    pub persisted_logs: usize,
    /// `GET_LOGS` limit when the caller gives none.
    pub default_log_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_logs: 1000,
            persisted_logs: 100,
            default_log_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Master switch. A disabled mediator denies everything.
    pub enabled: bool,
    /// API names whose denials should raise a user-visible notice.
    pub notify_apis: Vec<String>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_apis: ["geolocation", "mediaDevices", "clipboard", "cookies"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    pub decision_timeout_ms: u64,
}

impl InterceptorConfig {
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            decision_timeout_ms: 2000,
        }
    }
}

/// A built-in policy for one well-known origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub origin: String,
    /// Flag names to switch on, e.g. `"allowNetwork"`.
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub whitelisted: bool,
    #[serde(default)]
    pub risk_score: u8,
}

impl PresetConfig {
    fn to_policy(&self) -> JadeResult<Policy> {
        let mut policy = Policy::restrictive();
        for flag in &self.allow {
            let capability =
                Capability::from_flag_name(flag).ok_or_else(|| JadeError::ConfigError {
                    reason: format!("preset '{}' names unknown flag '{}'", self.origin, flag),
                })?;
            policy.capabilities.set(capability, true);
        }
        policy.whitelisted = self.whitelisted;
        policy.risk_score = self.risk_score;
        policy.validate().map_err(|e| JadeError::ConfigError {
            reason: format!("preset '{}': {}", self.origin, e),
        })?;
        Ok(policy)
    }
}

impl JadeConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `JadeError::ConfigError` for malformed TOML, values outside
    /// their valid range, or presets naming unknown flags.
    pub fn from_toml_str(s: &str) -> JadeResult<Self> {
        let config: JadeConfig = toml::from_str(s).map_err(|e| JadeError::ConfigError {
            reason: format!("failed to parse config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> JadeResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| JadeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> JadeResult<()> {
        if self.store.max_logs == 0 {
            return Err(JadeError::ConfigError {
                reason: "store.max_logs must be at least 1".to_string(),
            });
        }
        if self.store.persisted_logs > self.store.max_logs {
            return Err(JadeError::ConfigError {
                reason: format!(
                    "store.persisted_logs ({}) exceeds store.max_logs ({})",
                    self.store.persisted_logs, self.store.max_logs
                ),
            });
        }
        if self.interceptor.decision_timeout_ms == 0 {
            return Err(JadeError::ConfigError {
                reason: "interceptor.decision_timeout_ms must be positive".to_string(),
            });
        }
        for preset in &self.presets {
            preset.to_policy()?;
        }
        Ok(())
    }

    /// The preset table keyed by exact origin.
    pub fn preset_policies(&self) -> JadeResult<BTreeMap<Origin, Policy>> {
        if self.presets.is_empty() {
            return Ok(builtin_presets());
        }
        self.presets
            .iter()
            .map(|p| Ok((Origin::new(&p.origin), p.to_policy()?)))
            .collect()
    }
}

/// Presets for local development hosts and a couple of well-known sites.
pub fn builtin_presets() -> BTreeMap<Origin, Policy> {
    let local = || {
        let mut p = Policy::restrictive()
            .allowing(Capability::Dom)
            .allowing(Capability::Storage);
        p.risk_score = 10;
        p
    };
    let site = |risk: u8| {
        let mut p = Policy::restrictive()
            .allowing(Capability::Network)
            .allowing(Capability::Dom)
            .allowing(Capability::Storage);
        p.risk_score = risk;
        p
    };

    BTreeMap::from([
        (Origin::new("localhost"), local()),
        (Origin::new("127.0.0.1"), local()),
        (Origin::new("google.com"), site(30)),
        (Origin::new("github.com"), site(20)),
    ])
}
