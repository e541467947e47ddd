//! Audit trail of scheduler decisions.

use std::collections::VecDeque;

use crate::util::clock::now_ms;

/// One recorded scheduler decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Run that produced the event.
    pub run_id: String,
    /// Scheduler identity.
    pub identity: String,
    /// Action taken (lease_acquired, lease_contended, batch, admit,
    /// dispatch_failed, complete, run_end).
    pub action: String,
    /// Resource involved, if any.
    pub resource: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events with the given action.
    pub fn with_action(&self, action: &str) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared in-memory sink, so tests can keep a handle while the scheduler records.
impl AuditSink for std::sync::Arc<parking_lot::Mutex<InMemoryAuditSink>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    run_id: impl Into<String>,
    identity: impl Into<String>,
    action: impl Into<String>,
    resource: Option<String>,
    detail: Option<String>,
) -> AuditEvent {
    let run_id = run_id.into();
    let action = action.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{run_id}-{action}-{}", uuid::Uuid::new_v4().simple()),
        run_id,
        identity: identity.into(),
        action,
        resource,
        created_at_ms,
        detail,
    }
}
