//! Composition root owning the binders and the global event bus.

mod config;

use std::sync::{Arc, Weak};
use std::time::Instant;

use serde_json::json;

use crate::command::{CommandBinder, FailureReporter};
use crate::diagnostics::{ContextAuditEventBuilder, ContextAuditStage, Diagnostics};
use crate::dispatcher::{Event, EventDispatcher, EventId, EventTrigger, Payload};
use crate::error::{ContextError, Result, UnhandledCommandError};
use crate::injection::InjectionBinder;
use crate::logging::{LogLevel, json_kv, json_str, targets};
use crate::mediation::{MediationBinder, ObserverId, View, ViewLifecycle};
use crate::metrics::MetricSnapshot;

pub use self::config::{ContextConfig, ContextSettings};

/// Lifecycle of a context. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextState {
    Unbuilt,
    MappingBindings,
    Ready,
    Destroyed,
}

/// Events the context itself dispatches on its global bus.
pub struct ContextEvent;

impl ContextEvent {
    /// Fired once when the context reaches `Ready`.
    pub const START: &'static str = "context.start";
    /// Fired for every command failure. The payload is the
    /// `UnhandledCommandError`.
    pub const COMMAND_FAILED: &'static str = "context.command_failed";
}

/// Names of the core bindings every started context provides.
pub struct ContextKeys;

impl ContextKeys {
    /// The global `EventDispatcher`. Applications typically also bind the
    /// unnamed `EventDispatcher` to a fresh instance per resolution.
    pub const CONTEXT_DISPATCHER: &'static str = "context.dispatcher";
    /// The `dyn View` owning the context, when one was configured.
    pub const CONTEXT_VIEW: &'static str = "context.view";
}

/// Borrowed access to every binder while application bindings are mapped.
pub struct Binders<'a> {
    pub injection: &'a InjectionBinder,
    pub commands: &'a CommandBinder,
    pub mediation: &'a MediationBinder,
    pub dispatcher: &'a Arc<EventDispatcher>,
}

/// Application-supplied binding registration, run once during startup.
pub trait ContextBindings {
    fn map_bindings(&self, binders: &Binders<'_>) -> Result<()>;

    /// Runs after every binding is mapped and before the start event.
    fn post_bindings(&self, _binders: &Binders<'_>) -> Result<()> {
        Ok(())
    }
}

impl<F> ContextBindings for F
where
    F: Fn(&Binders<'_>) -> Result<()>,
{
    fn map_bindings(&self, binders: &Binders<'_>) -> Result<()> {
        self(binders)
    }
}

/// Owns one injection binder, one command binder, one mediation binder and
/// the global dispatcher for its whole lifetime.
pub struct Context {
    state: ContextState,
    bindings: Box<dyn ContextBindings>,
    config: ContextConfig,
    diagnostics: Diagnostics,
    injection: Arc<InjectionBinder>,
    commands: Arc<CommandBinder>,
    mediation: Arc<MediationBinder>,
    dispatcher: Arc<EventDispatcher>,
    observer: Option<ObserverId>,
    started_at: Option<Instant>,
}

impl Context {
    /// Build a context. Starts immediately when `config.autostart` is set.
    pub fn new<B>(bindings: B, config: ContextConfig) -> Result<Self>
    where
        B: ContextBindings + 'static,
    {
        let diagnostics = config.diagnostics();
        let injection = Arc::new(InjectionBinder::with_diagnostics(
            config.binding_policy,
            diagnostics.clone(),
        ));
        let commands = CommandBinder::new(Arc::clone(&injection));
        let mediation = Arc::new(MediationBinder::new(Arc::clone(&injection)));
        let dispatcher = Arc::new(EventDispatcher::with_diagnostics(diagnostics.clone()));

        let mut context = Self {
            state: ContextState::Unbuilt,
            bindings: Box::new(bindings),
            config,
            diagnostics,
            injection,
            commands,
            mediation,
            dispatcher,
            observer: None,
            started_at: None,
        };
        context.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::ContextConstructed)
                .detail("autostart", json!(context.config.autostart))
                .detail("has_view", json!(context.config.view.is_some()))
                .finish(),
        );
        if context.config.autostart {
            context.start()?;
        }
        Ok(context)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn injection_binder(&self) -> &Arc<InjectionBinder> {
        &self.injection
    }

    pub fn command_binder(&self) -> &Arc<CommandBinder> {
        &self.commands
    }

    pub fn mediation_binder(&self) -> &Arc<MediationBinder> {
        &self.mediation
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Map bindings, attach to the host and fire `ContextEvent::START`.
    ///
    /// A binding failure destroys the context and is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ContextState::Unbuilt {
            return Err(ContextError::InvalidTransition {
                from: self.state,
                to: ContextState::MappingBindings,
            });
        }
        self.state = ContextState::MappingBindings;
        self.started_at = Some(Instant::now());

        if let Err(err) = self.boot() {
            self.diagnostics.log(
                LogLevel::Error,
                targets::CONTEXT,
                "context_startup_failed",
                [json_str("error", err.to_string())],
            );
            self.diagnostics.audit(
                ContextAuditEventBuilder::new(ContextAuditStage::StartupFailed)
                    .detail("error", json!(err.to_string()))
                    .finish(),
            );
            self.teardown();
            return Err(err);
        }

        self.state = ContextState::Ready;
        self.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::ContextStarted)
                .detail("bindings", json!(self.injection.binding_count()))
                .finish(),
        );
        self.diagnostics.log(
            LogLevel::Info,
            targets::CONTEXT,
            "context_started",
            [
                json_kv("bindings", json!(self.injection.binding_count())),
                json_kv("attached", json!(self.observer.is_some())),
            ],
        );
        self.dispatcher.dispatch(ContextEvent::START);
        Ok(())
    }

    /// Release every binding, mediator and singleton the context owns.
    /// Destroying twice is a no-op; a destroyed context never restarts.
    pub fn destroy(&mut self) {
        if self.state == ContextState::Destroyed {
            return;
        }
        self.teardown();
    }

    pub fn dispatch(&self, id: impl Into<EventId>) {
        self.dispatcher.dispatch(id);
    }

    pub fn dispatch_with<T>(&self, id: impl Into<EventId>, payload: T)
    where
        T: std::any::Any + Send + Sync,
    {
        self.dispatcher.dispatch_with(id, payload);
    }

    /// Drain command failures collected since the last call.
    pub fn take_command_failures(&self) -> Vec<Arc<UnhandledCommandError>> {
        self.commands.take_failures()
    }

    pub fn metrics_snapshot(&self) -> Option<MetricSnapshot> {
        let uptime = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let metrics = self.diagnostics.metrics()?;
        let guard = metrics.lock().ok()?;
        Some(guard.snapshot(uptime))
    }

    fn boot(&mut self) -> Result<()> {
        self.map_core_bindings()?;

        let trigger = Arc::downgrade(&self.commands);
        let trigger: Weak<dyn EventTrigger> = trigger;
        self.dispatcher.add_trigger(trigger);
        self.commands.set_failure_reporter(self.failure_reporter());

        let binders = Binders {
            injection: &self.injection,
            commands: &self.commands,
            mediation: &self.mediation,
            dispatcher: &self.dispatcher,
        };
        self.bindings.map_bindings(&binders)?;
        self.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::BindingsMapped)
                .detail("bindings", json!(self.injection.binding_count()))
                .finish(),
        );
        self.bindings.post_bindings(&binders)?;

        if let Some(host) = self.config.host.as_ref() {
            let observer: Arc<dyn ViewLifecycle> = self.mediation.clone();
            self.observer = Some(host.attach(observer));
        }
        Ok(())
    }

    fn map_core_bindings(&self) -> Result<()> {
        self.injection
            .bind::<EventDispatcher>()
            .named(ContextKeys::CONTEXT_DISPATCHER)
            .to_value(Arc::clone(&self.dispatcher))?;
        self.injection
            .bind::<CommandBinder>()
            .to_value(Arc::clone(&self.commands))?;
        self.injection
            .bind::<MediationBinder>()
            .to_value(Arc::clone(&self.mediation))?;
        if let Some(view) = self.config.view.as_ref() {
            self.injection
                .bind::<dyn View>()
                .named(ContextKeys::CONTEXT_VIEW)
                .to_value(Arc::clone(view))?;
        }
        Ok(())
    }

    fn failure_reporter(&self) -> FailureReporter {
        let dispatcher = Arc::downgrade(&self.dispatcher);
        let diagnostics = self.diagnostics.clone();
        let redispatch = self.config.redispatch_failures;
        Arc::new(move |failure: &Arc<UnhandledCommandError>| {
            diagnostics.audit(
                ContextAuditEventBuilder::new(ContextAuditStage::CommandFailed)
                    .detail("event", json!(failure.event.as_str()))
                    .detail("command", json!(failure.command))
                    .detail("error", json!(failure.source.to_string()))
                    .finish(),
            );
            // A failing COMMAND_FAILED handler must not feed itself.
            if !redispatch || failure.event.as_str() == ContextEvent::COMMAND_FAILED {
                return;
            }
            if let Some(dispatcher) = dispatcher.upgrade() {
                let payload: Payload = Arc::clone(failure) as Payload;
                dispatcher.dispatch_event(&Event::with_shared(ContextEvent::COMMAND_FAILED, payload));
            }
        })
    }

    fn teardown(&mut self) {
        if let (Some(host), Some(observer)) = (self.config.host.as_ref(), self.observer.take()) {
            host.detach(observer);
        }
        let released = match self.mediation.clear() {
            Ok(released) => released,
            Err(err) => {
                self.diagnostics.log(
                    LogLevel::Warn,
                    targets::CONTEXT,
                    "mediator_release_failed",
                    [json_str("error", err.to_string())],
                );
                0
            }
        };
        self.commands.clear();
        self.dispatcher.clear();
        if let Err(err) = self.injection.clear() {
            self.diagnostics.log(
                LogLevel::Warn,
                targets::CONTEXT,
                "binding_release_failed",
                [json_str("error", err.to_string())],
            );
        }

        let previous = self.state;
        self.state = ContextState::Destroyed;
        self.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::ContextDestroyed)
                .detail("from", json!(format!("{previous:?}")))
                .detail("mediators_released", json!(released))
                .finish(),
        );
        self.diagnostics.log(
            LogLevel::Info,
            targets::CONTEXT,
            "context_destroyed",
            [
                json_str("from", format!("{previous:?}")),
                json_kv("mediators_released", json!(released)),
            ],
        );
        if let (Some(snapshot), Some(logger)) = (self.metrics_snapshot(), self.diagnostics.logger()) {
            let _ = logger.log_event(snapshot.to_log_event(targets::METRICS));
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}
