use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{ContextAudit, Diagnostics};
use crate::injection::BindingPolicy;
use crate::logging::{LogLevel, Logger};
use crate::mediation::{LifecycleHost, View};
use crate::metrics::{ContextMetrics, SharedMetrics};
use crate::Result;

/// Configuration knobs for a context.
#[derive(Clone)]
pub struct ContextConfig {
    /// Start as soon as the context is constructed.
    pub autostart: bool,
    /// Strictness of the injection and mediation binders.
    pub binding_policy: BindingPolicy,
    /// Re-dispatch command failures as `ContextEvent::COMMAND_FAILED`.
    pub redispatch_failures: bool,
    /// Optional structured logger shared by every binder.
    pub logger: Option<Logger>,
    /// Metrics accumulator shared by every binder.
    pub metrics: Option<SharedMetrics>,
    /// Lifecycle audit sink.
    pub audit: Option<Arc<dyn ContextAudit>>,
    /// The view owning this context, bound under `ContextKeys::CONTEXT_VIEW`.
    pub view: Option<Arc<dyn View>>,
    /// Lifecycle system the mediation binder observes once started.
    pub host: Option<Arc<dyn LifecycleHost>>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            binding_policy: BindingPolicy::Strict,
            redispatch_failures: true,
            logger: None,
            metrics: None,
            audit: None,
            view: None,
            host: None,
        }
    }
}

impl ContextConfig {
    pub fn with_view(mut self, view: Arc<dyn View>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_host(mut self, host: Arc<dyn LifecycleHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn ContextAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn manual_start(mut self) -> Self {
        self.autostart = false;
        self
    }

    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(ContextMetrics::shared());
        }
    }

    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    pub fn metrics_handle(&self) -> Option<SharedMetrics> {
        self.metrics.as_ref().map(Arc::clone)
    }

    /// Overlay values loaded from a settings file.
    pub fn apply_settings(&mut self, settings: &ContextSettings) {
        self.autostart = settings.autostart;
        self.binding_policy = settings.binding_policy;
        self.redispatch_failures = settings.redispatch_failures;
        if settings.metrics {
            self.enable_metrics();
        } else {
            self.disable_metrics();
        }
        if let (Some(level), Some(logger)) = (settings.log_level, self.logger.take()) {
            self.logger = Some(logger.with_min_level(level));
        }
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::silent();
        if let Some(logger) = self.logger.clone() {
            diagnostics = diagnostics.with_logger(logger);
        }
        if let Some(metrics) = self.metrics_handle() {
            diagnostics = diagnostics.with_metrics(metrics);
        }
        if let Some(audit) = self.audit.clone() {
            diagnostics = diagnostics.with_audit(audit);
        }
        diagnostics
    }
}

/// Serializable subset of [`ContextConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextSettings {
    pub autostart: bool,
    pub binding_policy: BindingPolicy,
    pub redispatch_failures: bool,
    pub metrics: bool,
    pub log_level: Option<LogLevel>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            autostart: true,
            binding_policy: BindingPolicy::Strict,
            redispatch_failures: true,
            metrics: false,
            log_level: None,
        }
    }
}

impl ContextSettings {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn into_config(self) -> ContextConfig {
        let mut config = ContextConfig::default();
        config.apply_settings(&self);
        config
    }
}
