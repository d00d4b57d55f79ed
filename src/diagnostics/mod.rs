//! Observability handle shared by the binders of one context.

pub mod audit;

use std::sync::Arc;

use serde_json::Value;

use crate::logging::{LogLevel, Logger, event_with_fields};
use crate::metrics::{ContextMetrics, SharedMetrics};

pub use audit::{
    ContextAudit, ContextAuditEvent, ContextAuditEventBuilder, ContextAuditStage,
    NullContextAudit, RecordingAudit,
};

/// Logger, metrics and audit sink bundled together. Every part is optional;
/// the default handle is silent.
#[derive(Clone)]
pub struct Diagnostics {
    logger: Option<Logger>,
    metrics: Option<SharedMetrics>,
    audit: Arc<dyn ContextAudit>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            logger: None,
            metrics: None,
            audit: Arc::new(NullContextAudit),
        }
    }
}

impl Diagnostics {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn ContextAudit>) -> Self {
        self.audit = audit;
        self
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    pub fn metrics(&self) -> Option<&SharedMetrics> {
        self.metrics.as_ref()
    }

    pub fn log<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        if let Some(logger) = self.logger.as_ref() {
            if logger.enabled(level) {
                let event = event_with_fields(level, target, message, fields);
                let _ = logger.log_event(event);
            }
        }
    }

    pub fn record(&self, update: impl FnOnce(&mut ContextMetrics)) {
        if let Some(metrics) = self.metrics.as_ref() {
            if let Ok(mut guard) = metrics.lock() {
                update(&mut guard);
            }
        }
    }

    pub fn audit(&self, event: ContextAuditEvent) {
        self.audit.record(event);
    }
}
