use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SharedMetrics = Arc<Mutex<ContextMetrics>>;

/// Counters accumulated over a context's lifetime.
#[derive(Debug, Default, Clone)]
pub struct ContextMetrics {
    dispatches: u64,
    commands_executed: u64,
    commands_failed: u64,
    sequences_halted: u64,
    sequences_deferred: u64,
    mediators_registered: u64,
    mediators_removed: u64,
    singletons_constructed: u64,
}

impl ContextMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record_dispatch(&mut self) {
        self.dispatches = self.dispatches.saturating_add(1);
    }

    pub fn record_command(&mut self) {
        self.commands_executed = self.commands_executed.saturating_add(1);
    }

    pub fn record_command_failure(&mut self) {
        self.commands_failed = self.commands_failed.saturating_add(1);
    }

    pub fn record_sequence_halt(&mut self) {
        self.sequences_halted = self.sequences_halted.saturating_add(1);
    }

    pub fn record_sequence_deferral(&mut self) {
        self.sequences_deferred = self.sequences_deferred.saturating_add(1);
    }

    pub fn record_mediator_registered(&mut self) {
        self.mediators_registered = self.mediators_registered.saturating_add(1);
    }

    pub fn record_mediator_removed(&mut self) {
        self.mediators_removed = self.mediators_removed.saturating_add(1);
    }

    pub fn record_singleton(&mut self) {
        self.singletons_constructed = self.singletons_constructed.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            dispatches: self.dispatches,
            commands_executed: self.commands_executed,
            commands_failed: self.commands_failed,
            sequences_halted: self.sequences_halted,
            sequences_deferred: self.sequences_deferred,
            mediators_registered: self.mediators_registered,
            mediators_removed: self.mediators_removed,
            singletons_constructed: self.singletons_constructed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub dispatches: u64,
    pub commands_executed: u64,
    pub commands_failed: u64,
    pub sequences_halted: u64,
    pub sequences_deferred: u64,
    pub mediators_registered: u64,
    pub mediators_removed: u64,
    pub singletons_constructed: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "context_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("dispatches".to_string(), json!(self.dispatches));
        map.insert("commands_executed".to_string(), json!(self.commands_executed));
        map.insert("commands_failed".to_string(), json!(self.commands_failed));
        map.insert("sequences_halted".to_string(), json!(self.sequences_halted));
        map.insert("sequences_deferred".to_string(), json!(self.sequences_deferred));
        map.insert(
            "mediators_registered".to_string(),
            json!(self.mediators_registered),
        );
        map.insert("mediators_removed".to_string(), json!(self.mediators_removed));
        map.insert(
            "singletons_constructed".to_string(),
            json!(self.singletons_constructed),
        );
        map
    }
}
