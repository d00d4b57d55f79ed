use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::dispatcher::Event;
use crate::error::{CommandError, CommandResult, InjectResult};
use crate::injection::Injector;

use super::core::CommandBinder;

/// Transient unit of work run in response to an event.
///
/// A fresh instance is constructed through the injection binder for every
/// execution and dropped once it completes.
pub trait Command: Send {
    fn execute(&mut self, scope: &mut CommandScope<'_>) -> CommandResult<()>;
}

pub(crate) type CommandFactory =
    Arc<dyn Fn(&mut Injector<'_>) -> InjectResult<Box<dyn Command>> + Send + Sync>;

pub(crate) fn command_factory<F>(factory: F) -> CommandFactory
where
    F: Fn(&mut Injector<'_>) -> InjectResult<Box<dyn Command>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

#[derive(Clone)]
pub(crate) struct CommandSpec {
    pub(crate) name: &'static str,
    pub(crate) factory: CommandFactory,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How a deferred step was resolved.
pub(crate) enum Outcome {
    Complete,
    Halt,
    Fail(CommandError),
}

/// State of one deferred step.
pub(crate) enum Deferral {
    /// `defer()` was called and the command is still executing.
    Waiting,
    /// The token resolved before the command returned.
    Resolved(Outcome),
    /// The run is suspended until the token resolves.
    Parked(SequenceRun),
    Done,
}

pub(crate) type DeferralSlot = Arc<Mutex<Deferral>>;

/// One in-flight pass over a descriptor's commands.
///
/// A single command is a run of length one. The run owns its position, the
/// triggering event and, while suspended, the command awaiting completion.
pub(crate) struct SequenceRun {
    pub(crate) event: Event,
    pub(crate) steps: Arc<[CommandSpec]>,
    pub(crate) index: usize,
    pub(crate) current: &'static str,
    pub(crate) alive: Arc<AtomicBool>,
    pub(crate) in_flight: Option<Box<dyn Command>>,
}

impl SequenceRun {
    pub(crate) fn new(event: Event, steps: Arc<[CommandSpec]>, alive: Arc<AtomicBool>) -> Self {
        Self {
            event,
            steps,
            index: 0,
            current: "",
            alive,
            in_flight: None,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_sequence(&self) -> bool {
        self.steps.len() > 1
    }

    pub(crate) fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.index)
    }
}

/// What the runner does once `execute` returns.
pub(crate) enum Flow {
    Continue,
    Halt,
    Deferred(DeferralSlot),
}

/// Handle passed to [`Command::execute`].
pub struct CommandScope<'a> {
    event: &'a Event,
    binder: Weak<CommandBinder>,
    alive: Arc<AtomicBool>,
    halted: bool,
    deferral: Option<DeferralSlot>,
}

impl<'a> CommandScope<'a> {
    pub(crate) fn new(event: &'a Event, binder: Weak<CommandBinder>, alive: Arc<AtomicBool>) -> Self {
        Self {
            event,
            binder,
            alive,
            halted: false,
            deferral: None,
        }
    }

    pub fn event(&self) -> &'a Event {
        self.event
    }

    pub fn payload<T: Any>(&self) -> Option<&'a T> {
        self.event.payload::<T>()
    }

    /// Skip the rest of this sequence. Other bindings for the event still run.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Suspend the sequence after this command returns, until the returned
    /// token resolves. Never blocks the dispatching thread.
    pub fn defer(&mut self) -> CompletionToken {
        let slot = self
            .deferral
            .get_or_insert_with(|| Arc::new(Mutex::new(Deferral::Waiting)));
        CompletionToken {
            slot: Arc::clone(slot),
            binder: self.binder.clone(),
            alive: Arc::clone(&self.alive),
        }
    }

    pub(crate) fn into_flow(self) -> Flow {
        if self.halted {
            return Flow::Halt;
        }
        match self.deferral {
            Some(slot) => Flow::Deferred(slot),
            None => Flow::Continue,
        }
    }
}

/// Resumption handle for a deferred command.
///
/// Resolving a token whose binding was unbound, or whose binder is gone,
/// does nothing. Each token resolves at most once; a token dropped without
/// resolving leaves its sequence suspended.
pub struct CompletionToken {
    slot: DeferralSlot,
    binder: Weak<CommandBinder>,
    alive: Arc<AtomicBool>,
}

impl CompletionToken {
    /// Resume the sequence with the next command.
    pub fn complete(self) -> bool {
        self.resolve(Outcome::Complete)
    }

    /// Stop the sequence here.
    pub fn halt(self) -> bool {
        self.resolve(Outcome::Halt)
    }

    /// Report a failure for the deferred command and stop the sequence.
    pub fn fail(self, error: impl Into<CommandError>) -> bool {
        self.resolve(Outcome::Fail(error.into()))
    }

    /// Whether resolving this token would still have an effect.
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire)
            && self.binder.strong_count() > 0
            && self
                .slot
                .lock()
                .map(|guard| matches!(*guard, Deferral::Waiting | Deferral::Parked(_)))
                .unwrap_or(false)
    }

    fn resolve(self, outcome: Outcome) -> bool {
        let binder = match self.binder.upgrade() {
            Some(binder) if self.alive.load(Ordering::Acquire) => binder,
            _ => {
                // Cancelled: drop any parked run without resuming it.
                let parked = self
                    .slot
                    .lock()
                    .map(|mut guard| std::mem::replace(&mut *guard, Deferral::Done))
                    .ok();
                drop(parked);
                return false;
            }
        };

        let Ok(mut guard) = self.slot.lock() else {
            return false;
        };
        match std::mem::replace(&mut *guard, Deferral::Done) {
            Deferral::Waiting => {
                *guard = Deferral::Resolved(outcome);
                true
            }
            Deferral::Parked(run) => {
                drop(guard);
                binder.resume(run, outcome);
                true
            }
            previous @ Deferral::Resolved(_) => {
                *guard = previous;
                false
            }
            Deferral::Done => false,
        }
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("live", &self.is_live())
            .finish()
    }
}
