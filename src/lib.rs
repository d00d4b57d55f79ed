//! Inversion-of-control context for event-driven applications.
//!
//! A [`Context`] owns a typed injection binder, a global event dispatcher, a
//! command binder routing events to transient injected commands, and a
//! mediation binder pairing live views with per-view mediators.

pub mod command;
pub mod context;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod injection;
pub mod input;
pub mod logging;
pub mod mediation;
pub mod metrics;

pub use command::{Command, CommandBinder, CommandBindingBuilder, CommandScope, CompletionToken};
pub use context::{
    Binders, Context, ContextBindings, ContextConfig, ContextEvent, ContextKeys, ContextSettings,
    ContextState,
};
pub use diagnostics::{
    ContextAudit, ContextAuditEvent, ContextAuditEventBuilder, ContextAuditStage, Diagnostics,
    NullContextAudit, RecordingAudit,
};
pub use dispatcher::{Event, EventDispatcher, EventId, EventTrigger, Listener, ListenerId, Payload};
pub use error::{
    BoxError, CommandError, CommandResult, ContextError, InjectResult, InjectionError,
    MediationError, MediationResult, Result, UnhandledCommandError,
};
pub use injection::{
    BindingBuilder, BindingHandle, BindingKey, BindingPolicy, Injectable, InjectionBinder,
    Injector, Provide,
};
pub use input::{ClickDetector, InputBridge, InputSignal, PointerClick, Region};
pub use logging::{LogEvent, LogFields, LogLevel, Logger, LoggingError, LoggingResult};
pub use mediation::{
    Lifeline, LifecycleHost, MediationBinder, Mediator, View, ViewHandle, ViewHost, ViewId,
    ViewInterfaces, ViewLifecycle,
};
pub use metrics::{ContextMetrics, MetricSnapshot, SharedMetrics};
