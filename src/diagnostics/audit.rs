//! Context lifecycle audit hooks.
//!
//! Records capture a stage identifier plus structured metadata so callers can
//! buffer, assert on, or visualize a context's progression without threading
//! extra state through the binders.

use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;

/// Distinct lifecycle checkpoints emitted by a context and its binders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAuditStage {
    /// A new context instance was constructed.
    ContextConstructed,
    /// Application bindings finished mapping.
    BindingsMapped,
    /// Startup aborted because a binding step failed.
    StartupFailed,
    /// The context reached `Ready` and fired its start event.
    ContextStarted,
    /// A mediator was created for a live view.
    MediatorRegistered,
    /// A mediator was released after its view deactivated.
    MediatorRemoved,
    /// A command error escaped execution.
    CommandFailed,
    /// The context released every binding it owned.
    ContextDestroyed,
}

#[derive(Debug, Clone)]
pub struct ContextAuditEvent {
    pub timestamp: SystemTime,
    pub stage: ContextAuditStage,
    pub details: Vec<(String, Value)>,
}

impl ContextAuditEvent {
    fn new(stage: ContextAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

pub struct ContextAuditEventBuilder {
    event: ContextAuditEvent,
}

impl ContextAuditEventBuilder {
    pub fn new(stage: ContextAuditStage) -> Self {
        Self {
            event: ContextAuditEvent::new(stage),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.event.details.push((key.into(), value));
        self
    }

    pub fn finish(self) -> ContextAuditEvent {
        self.event
    }
}

pub trait ContextAudit: Send + Sync {
    fn record(&self, event: ContextAuditEvent);
}

/// Default sink used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullContextAudit;

impl ContextAudit for NullContextAudit {
    fn record(&self, _event: ContextAuditEvent) {}
}

/// Buffers every record in memory.
#[derive(Debug, Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<ContextAuditEvent>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ContextAuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<ContextAuditStage> {
        self.events().into_iter().map(|event| event.stage).collect()
    }
}

impl ContextAudit for RecordingAudit {
    fn record(&self, event: ContextAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_audit_keeps_order_and_details() {
        let audit = RecordingAudit::new();
        audit.record(ContextAuditEventBuilder::new(ContextAuditStage::ContextConstructed).finish());
        audit.record(
            ContextAuditEventBuilder::new(ContextAuditStage::MediatorRegistered)
                .detail("view", json!("ClickDetector"))
                .finish(),
        );

        assert_eq!(
            audit.stages(),
            vec![
                ContextAuditStage::ContextConstructed,
                ContextAuditStage::MediatorRegistered
            ]
        );
        let events = audit.events();
        assert_eq!(events[1].detail("view"), Some(&json!("ClickDetector")));
    }
}
