//! # jade-audit
//!
//! The bounded audit trail behind the JADE policy store, and the risk
//! scores derived from it.
//!
//! ## Overview
//!
//! `AuditLog` holds at most `capacity` events, newest first. Each append
//! evicts from the tail in the same step, and only the newest `persisted`
//! events are handed to storage. Risk scores are never cached: callers
//! recompute them from whatever the log holds at call time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jade_audit::{AuditLog, risk_score};
//!
//! let mut log = AuditLog::new(1000, 100);
//! log.prepend(event);
//! let score = risk_score(&origin, log.iter());
//! ```

pub mod log;
pub mod risk;

pub use log::AuditLog;
pub use risk::{risk_score, tally_by_origin, RiskTally, BASELINE_RISK};

// ── Tests ─────────────────────────────────────────────────────────────────────
