use thiserror::Error;

use crate::context::ContextState;
use crate::dispatcher::EventId;

/// Boxed error used where user code supplies its own failure type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified result type for context-level operations.
pub type Result<T> = std::result::Result<T, ContextError>;

pub type InjectResult<T> = std::result::Result<T, InjectionError>;

pub type CommandResult<T> = std::result::Result<T, CommandError>;

pub type MediationResult<T> = std::result::Result<T, MediationError>;

/// Errors raised by the injection binder. All of these indicate a binding
/// configuration defect and abort context startup.
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("no binding for `{abstraction}`{}", describe_name(.name))]
    UnboundAbstraction {
        abstraction: &'static str,
        name: Option<String>,
    },
    #[error("`{abstraction}`{} is already bound", describe_name(.name))]
    DuplicateBinding {
        abstraction: &'static str,
        name: Option<String>,
    },
    #[error("circular dependency: {chain}")]
    CircularDependency { chain: String },
    #[error("binding for `{abstraction}` produced a value of the wrong type")]
    TypeMismatch { abstraction: &'static str },
    #[error("no view of type `{expected}` is available to this injector")]
    MissingView { expected: &'static str },
    #[error("failed to construct `{abstraction}`: {source}")]
    Construction {
        abstraction: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("binding table poisoned")]
    Poisoned,
}

impl InjectionError {
    /// Wrap an arbitrary constructor failure for type `T`.
    pub fn construction<T: ?Sized>(source: impl Into<BoxError>) -> Self {
        Self::Construction {
            abstraction: std::any::type_name::<T>(),
            source: source.into(),
        }
    }
}

fn describe_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" (named `{name}`)"),
        None => String::new(),
    }
}

/// Failure produced by a command while it is constructed or executed.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Injection(#[from] InjectionError),
    #[error(transparent)]
    Other(#[from] BoxError),
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A command error that escaped execution. Reported to the owning context,
/// never swallowed.
#[derive(Debug, Error)]
#[error("command `{command}` failed on event `{event}`: {source}")]
pub struct UnhandledCommandError {
    pub event: EventId,
    pub command: &'static str,
    #[source]
    pub source: CommandError,
}

#[derive(Debug, Error)]
pub enum MediationError {
    #[error("{0}")]
    Failed(String),
    #[error("`{view}` is already bound to a mediator")]
    DuplicateBinding { view: &'static str },
    #[error("mediator `{mediator}` failed in {hook}: {source}")]
    Hook {
        mediator: &'static str,
        hook: &'static str,
        #[source]
        source: Box<MediationError>,
    },
    #[error(transparent)]
    Injection(#[from] InjectionError),
    #[error("mediation table poisoned")]
    Poisoned,
}

impl MediationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: ContextState, to: ContextState },
    #[error(transparent)]
    Injection(#[from] InjectionError),
    #[error(transparent)]
    Mediation(#[from] MediationError),
    #[error("binding setup failed: {0}")]
    Bindings(String),
    #[error("invalid context settings: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
