//! Error taxonomy shared by every binder and the context.

mod types;

pub use types::{
    BoxError, CommandError, CommandResult, ContextError, InjectResult, InjectionError,
    MediationError, MediationResult, Result, UnhandledCommandError,
};
