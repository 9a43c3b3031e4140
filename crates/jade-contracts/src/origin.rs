//! Origin identity: the key every policy and audit entry is scoped by.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// A normalized hostname.
///
/// Construction always lowercases and strips one leading `www.`, so
/// `"WWW.Example.com"` and `"example.com"` name the same policy scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Origin(String);

/// Storage key prefix for persisted policies.
pub const POLICY_KEY_PREFIX: &str = "policy_";

impl Origin {
    /// Build an origin from a bare hostname.
    pub fn new(host: impl AsRef<str>) -> Self {
        let lowered = host.as_ref().trim().to_ascii_lowercase();
        match lowered.strip_prefix("www.") {
            Some(rest) => Self(rest.to_string()),
            None => Self(lowered),
        }
    }

    /// Extract the origin from a page URL.
    ///
    /// Input that does not parse as a URL, or that has no host, is treated
    /// as a hostname and normalized as-is.
    pub fn from_url(input: &str) -> Self {
        match Url::parse(input) {
            Ok(url) => match url.host_str() {
                Some(host) => Self::new(host),
                None => Self::new(input),
            },
            Err(_) => Self::new(input),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key this origin's policy is persisted under.
    pub fn storage_key(&self) -> String {
        format!("{POLICY_KEY_PREFIX}{}", self.0)
    }

    /// Inverse of [`Origin::storage_key`]; `None` for non-policy keys.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        key.strip_prefix(POLICY_KEY_PREFIX).map(Self::new)
    }
}

/// Accepts either a page URL or a bare hostname.
impl From<String> for Origin {
    fn from(value: String) -> Self {
        Self::from_url(&value)
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        Self::from_url(value)
    }
}

impl From<Origin> for String {
    fn from(value: Origin) -> Self {
        value.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
