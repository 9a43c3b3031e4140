//! The bounded in-memory audit log.
//!
//! Events are kept most-recent-first. Appending beyond `capacity` drops the
//! oldest entries in the same call, so no reader ever sees more than
//! `capacity` events. Only the newest `persisted` events form the durable
//! slice written to storage.

use std::collections::VecDeque;

use tracing::debug;

use jade_contracts::event::AuditEvent;

#[derive(Debug, Clone)]
pub struct AuditLog {
    events: VecDeque<AuditEvent>,
    capacity: usize,
    persisted: usize,
}

impl AuditLog {
    /// `persisted` is clamped to `capacity`.
    pub fn new(capacity: usize, persisted: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            persisted: persisted.min(capacity),
        }
    }

    /// Replace the contents with events loaded from storage.
    ///
    /// `events` must already be most-recent-first; anything past `capacity`
    /// is dropped.
    pub fn seed(&mut self, events: Vec<AuditEvent>) {
        self.events = events.into_iter().take(self.capacity).collect();
        debug!(seeded = self.events.len(), "audit log seeded from storage");
    }

    /// Put `event` at the front, evicting from the back past capacity.
    pub fn prepend(&mut self, event: AuditEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.events.iter().take(limit).cloned().collect()
    }

    /// The slice that is written to storage after each append.
    pub fn durable_slice(&self) -> Vec<AuditEvent> {
        self.recent(self.persisted)
    }

    /// Drop every event, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.events.len();
        self.events.clear();
        n
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
