//! Event-to-command routing with ordered, interruptible sequences.

mod core;
mod sequence;

pub use self::core::{CommandBinder, CommandBindingBuilder, FailureReporter};
pub use self::sequence::{Command, CommandScope, CompletionToken};
