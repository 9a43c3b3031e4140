//! Error types for the JADE mediation pipeline.
//!
//! Every fallible pipeline operation returns `JadeResult<T>`. At the control
//! surface errors are flattened into `{success: false, error}` envelopes via
//! their `Display` text.

use thiserror::Error;

/// The unified error type for the mediation pipeline.
#[derive(Debug, Error)]
pub enum JadeError {
    /// The requested API is not in the capability map.
    #[error("unknown capability '{api}'")]
    UnknownCapability { api: String },

    /// The API is mapped but its flag is off and the origin is not whitelisted.
    #[error("policy violation: {flag} is disabled")]
    PolicyViolation { flag: String },

    /// No response arrived before the request's deadline.
    #[error("request {request_id} timed out after {after_ms}ms")]
    Timeout { request_id: String, after_ms: u64 },

    /// The storage service failed a read or write.
    #[error("storage failure: {reason}")]
    StorageFailure { reason: String },

    /// A message was missing required fields or had an unknown type.
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// The other end of a channel hop has been torn down.
    #[error("channel closed: {endpoint}")]
    ChannelClosed { endpoint: String },

    /// The policy store answered with a failure envelope.
    #[error("policy store rejected request: {error}")]
    StoreRejected { error: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

pub type JadeResult<T> = Result<T, JadeError>;
