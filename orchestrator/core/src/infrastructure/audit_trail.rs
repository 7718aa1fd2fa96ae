// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Trail
//!
//! In-process bus for audit events with durable forwarding left to
//! subscribers.
//!
//! `emit_event` validates the event shape, redacts its payload, seals it
//! into the hash chain and then synchronously notifies every subscriber in
//! registration order. A subscriber that returns an error or panics is
//! logged and skipped; delivery to the remaining subscribers continues and
//! nothing is propagated to the emitter.
//!
//! No subscriber is assumed durable. Production persistence is one more
//! subscriber (see [`crate::application::audit_persister::AuditPersister`]).

use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use crate::domain::audit::{verify_chain, AuditEntry, ChainError, GENESIS_HASH};
use crate::domain::events::{AgentEvent, EventShapeError};
use crate::domain::redaction::Redactor;
use crate::domain::tool::AuditCallback;

/// Receives sealed audit entries.
pub trait AuditSubscriber: Send + Sync {
    fn on_event(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

impl<F> AuditSubscriber for F
where
    F: Fn(&AuditEntry) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        (self)(entry)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("invalid audit event: {0}")]
    Shape(#[from] EventShapeError),

    #[error("audit event could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

struct ChainState {
    next_sequence: u64,
    last_hash: String,
}

struct Inner {
    subscribers: RwLock<Vec<(u64, Arc<dyn AuditSubscriber>)>>,
    next_subscriber_id: AtomicU64,
    chain: Mutex<ChainState>,
    redactor: Redactor,
}

/// Cheap to clone; all clones share subscribers and chain state.
#[derive(Clone)]
pub struct AuditTrail {
    inner: Arc<Inner>,
}

/// Deregistration capability returned by [`AuditTrail::on_event`].
pub struct Subscription {
    id: u64,
    trail: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.trail.upgrade() {
            inner.subscribers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl AuditTrail {
    pub fn new(redactor: Redactor) -> Self {
        Self::resume(redactor, None)
    }

    /// Continue the chain after `tail`, the newest entry already stored.
    /// Without a tail the chain starts at sequence 0 from [`GENESIS_HASH`].
    pub fn resume(redactor: Redactor, tail: Option<&AuditEntry>) -> Self {
        let chain = match tail {
            Some(entry) => ChainState {
                next_sequence: entry.sequence + 1,
                last_hash: entry.hash.clone(),
            },
            None => ChainState {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_string(),
            },
        };
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                chain: Mutex::new(chain),
                redactor,
            }),
        }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.inner.redactor
    }

    pub fn on_event(&self, subscriber: impl AuditSubscriber + 'static) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push((id, Arc::new(subscriber)));
        Subscription {
            id,
            trail: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Validate, redact, seal and deliver an event.
    pub fn emit_event(&self, mut event: AgentEvent) -> Result<AuditEntry, AuditError> {
        event.validate()?;
        event.payload = self.inner.redactor.redact(&event.payload);

        let entry = {
            let mut chain = self.inner.chain.lock();
            let entry = AuditEntry::seal(chain.next_sequence, &chain.last_hash, event)?;
            chain.next_sequence += 1;
            chain.last_hash = entry.hash.clone();
            entry
        };

        // Snapshot so subscribers may (de)register while being notified.
        let subscribers: Vec<(u64, Arc<dyn AuditSubscriber>)> = self.inner.subscribers.read().clone();
        debug!(
            sequence = entry.sequence,
            event_type = %entry.event.event_type,
            subscribers = subscribers.len(),
            "Delivering audit event"
        );

        for (id, subscriber) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(subscriber = id, error = %e, "Audit subscriber failed"),
                Err(_) => error!(subscriber = id, "Audit subscriber panicked"),
            }
        }

        Ok(entry)
    }

    /// Emit and log instead of returning the error. For call sites where an
    /// audit failure must not change the outcome of the audited action.
    pub fn record(&self, event: AgentEvent) {
        if let Err(e) = self.emit_event(event) {
            error!(error = %e, "Dropped malformed audit event");
        }
    }

    /// Check that `entries` form an unbroken, untampered chain.
    pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainError> {
        verify_chain(entries)
    }

    /// Callback for [`crate::domain::tool::ToolContext::audit`].
    pub fn callback(&self) -> AuditCallback {
        let trail = self.clone();
        Arc::new(move |event: AgentEvent| trail.record(event))
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(Redactor::default())
    }
}

/// Test probe collecting every delivered entry.
#[derive(Clone, Default)]
pub struct RecordingSubscriber {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSubscriber for RecordingSubscriber {
    fn on_event(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::AgentEventType;
    use crate::domain::run::RunId;
    use serde_json::json;

    fn event(payload: serde_json::Value) -> AgentEvent {
        AgentEvent::for_run(AgentEventType::TaskUpdated, RunId::new(), payload)
    }

    #[test]
    fn test_subscribers_notified_in_order() {
        let trail = AuditTrail::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            trail.on_event(move |_: &AuditEntry| -> anyhow::Result<()> {
                order.lock().push(n);
                Ok(())
            });
        }
        trail.emit_event(event(json!({}))).unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_delivery() {
        let trail = AuditTrail::default();
        trail.on_event(|_: &AuditEntry| -> anyhow::Result<()> { anyhow::bail!("sink down") });
        trail.on_event(|_: &AuditEntry| -> anyhow::Result<()> { panic!("bad subscriber") });
        let probe = RecordingSubscriber::new();
        trail.on_event(probe.clone());

        assert!(trail.emit_event(event(json!({"n": 1}))).is_ok());
        assert_eq!(probe.len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let trail = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        let subscription = trail.on_event(probe.clone());
        trail.emit_event(event(json!({}))).unwrap();
        subscription.unsubscribe();
        trail.emit_event(event(json!({}))).unwrap();
        assert_eq!(probe.len(), 1);
        assert_eq!(trail.subscriber_count(), 0);
    }

    #[test]
    fn test_payload_redacted_before_delivery() {
        let trail = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        trail.on_event(probe.clone());
        trail.emit_event(event(json!({"email": "guest@example.org"}))).unwrap();
        let entries = probe.entries();
        assert_eq!(entries[0].event.payload["email"], "[REDACTED]");
    }

    #[test]
    fn test_invalid_shape_rejected_and_not_delivered() {
        let trail = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        trail.on_event(probe.clone());
        let bad = AgentEvent::new(AgentEventType::RunCompleted, None, json!({}));
        assert!(matches!(trail.emit_event(bad), Err(AuditError::Shape(_))));
        assert!(probe.is_empty());
    }

    #[test]
    fn test_entries_form_a_chain() {
        let trail = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        trail.on_event(probe.clone());
        for n in 0..5 {
            trail.emit_event(event(json!({"n": n}))).unwrap();
        }
        let entries = probe.entries();
        assert_eq!(entries.first().map(|e| e.prev_hash.as_str()), Some(GENESIS_HASH));
        assert!(AuditTrail::verify_chain(&entries).is_ok());

        let mut tampered = entries.clone();
        tampered[2].event.payload = json!({"n": 99});
        assert!(AuditTrail::verify_chain(&tampered).is_err());
    }

    #[test]
    fn test_resumed_trail_continues_the_chain() {
        let first = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        first.on_event(probe.clone());
        for n in 0..3 {
            first.emit_event(event(json!({"n": n}))).unwrap();
        }

        let stored = probe.entries();
        let second = AuditTrail::resume(Redactor::default(), stored.last());
        second.on_event(probe.clone());
        for n in 3..6 {
            second.emit_event(event(json!({"n": n}))).unwrap();
        }

        let entries = probe.entries();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(entries[3].prev_hash, entries[2].hash);
        assert!(AuditTrail::verify_chain(&entries).is_ok());
    }
}
