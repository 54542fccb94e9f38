//! The append-only log

use crate::event::{AuditEvent, AuditKind, TraceId};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default event retention bound.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// Bounded in-memory audit log.
///
/// Cheap to share behind an `Arc`; every subsystem that makes
/// security-relevant decisions holds a handle. Appends take the write
/// lock briefly; queries clone matching events out.
#[derive(Debug)]
pub struct AuditLog {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl AuditLog {
    /// Create a log with the default retention bound.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a log retaining at most `max_events` events.
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
        }
    }

    /// Append an event.
    ///
    /// Never fails: the underlying operation already happened. When the
    /// retention bound is hit the oldest event is dropped and the drop is
    /// noted through `tracing`.
    pub async fn append(&self, event: AuditEvent) {
        let mut events = self.events.write().await;
        if events.len() == self.max_events {
            tracing::warn!(
                max_events = self.max_events,
                "audit log at capacity, dropping oldest event"
            );
            events.pop_front();
        }
        tracing::debug!(kind = ?event.kind, agent = ?event.agent_id, outcome = %event.outcome, "audit");
        events.push_back(event);
    }

    /// All events of one kind, oldest first.
    pub async fn by_kind(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// All events concerning one agent, oldest first.
    pub async fn by_agent(&self, agent_id: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }

    /// All events sharing a trace id, in append order.
    pub async fn by_trace(&self, trace_id: &TraceId) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.trace_id.as_ref() == Some(trace_id))
            .cloned()
            .collect()
    }

    /// Events recorded inside `[start, end]`, oldest first.
    pub async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    /// The most recent `n` events, newest last.
    pub async fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
