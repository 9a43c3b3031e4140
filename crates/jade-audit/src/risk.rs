//! Per-origin risk scoring from audit history.
//!
//! Score = round(50 + 50 * blocked / (blocked + allowed)), clamped to
//! [0, 100]. An origin with no allowed or blocked events scores the
//! baseline. `detected` events do not count.

use std::collections::HashMap;

use jade_contracts::{
    event::{AuditAction, AuditEvent},
    origin::Origin,
};

/// Score for an origin with no decisions on record.
pub const BASELINE_RISK: u8 = 50;

/// Allowed/blocked counts for one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskTally {
    pub allowed: usize,
    pub blocked: usize,
}

impl RiskTally {
    pub fn record(&mut self, action: AuditAction) {
        match action {
            AuditAction::Allowed => self.allowed += 1,
            AuditAction::Blocked => self.blocked += 1,
            AuditAction::Detected => {}
        }
    }

    pub fn score(&self) -> u8 {
        let total = self.allowed + self.blocked;
        if total == 0 {
            return BASELINE_RISK;
        }
        let ratio = self.blocked as f64 / total as f64;
        let raw = f64::from(BASELINE_RISK) + ratio * 50.0;
        raw.round().clamp(0.0, 100.0) as u8
    }
}

/// Risk score for one origin over `events`.
pub fn risk_score<'a>(origin: &Origin, events: impl IntoIterator<Item = &'a AuditEvent>) -> u8 {
    let mut tally = RiskTally::default();
    for event in events.into_iter().filter(|e| e.origin() == origin) {
        tally.record(event.action());
    }
    tally.score()
}

/// Tallies for every origin appearing in `events`, in one pass.
pub fn tally_by_origin<'a>(
    events: impl IntoIterator<Item = &'a AuditEvent>,
) -> HashMap<Origin, RiskTally> {
    let mut tallies: HashMap<Origin, RiskTally> = HashMap::new();
    for event in events {
        tallies
            .entry(event.origin().clone())
            .or_default()
            .record(event.action());
    }
    tallies
}
