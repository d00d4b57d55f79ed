use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::json;

use crate::diagnostics::Diagnostics;
use crate::dispatcher::{Event, EventId, EventTrigger};
use crate::error::{CommandError, UnhandledCommandError};
use crate::injection::{Injectable, InjectionBinder, Injector};
use crate::logging::{LogLevel, json_kv, json_str, targets};

use super::sequence::{
    Command, CommandScope, CommandSpec, Deferral, Flow, Outcome, SequenceRun, command_factory,
};

/// Callback receiving every command failure as it happens.
pub type FailureReporter = Arc<dyn Fn(&Arc<UnhandledCommandError>) + Send + Sync>;

struct Descriptor {
    steps: Arc<[CommandSpec]>,
    // Dropped from its event after the first trigger.
    once: bool,
}

struct EventBinding {
    descriptors: Vec<Descriptor>,
    // Cleared on unbind so pending completion tokens become no-ops.
    alive: Arc<AtomicBool>,
}

impl EventBinding {
    fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Routes events to transient, injected commands.
///
/// Registered on a dispatcher as an [`EventTrigger`]. Each descriptor bound
/// to an event runs independently: a halted or failing sequence never stops
/// its siblings. Failures are queued until [`CommandBinder::take_failures`]
/// and handed to the failure reporter when one is installed.
pub struct CommandBinder {
    injection: Arc<InjectionBinder>,
    bindings: RwLock<HashMap<EventId, EventBinding>>,
    failures: Mutex<Vec<Arc<UnhandledCommandError>>>,
    reporter: RwLock<Option<FailureReporter>>,
    diagnostics: Diagnostics,
    me: Weak<CommandBinder>,
}

impl CommandBinder {
    pub fn new(injection: Arc<InjectionBinder>) -> Arc<Self> {
        let diagnostics = injection.diagnostics().clone();
        Arc::new_cyclic(|me| Self {
            injection,
            bindings: RwLock::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            reporter: RwLock::new(None),
            diagnostics,
            me: me.clone(),
        })
    }

    /// Start binding commands to `event`. Bindings accumulate: binding the
    /// same event again adds descriptors next to the existing ones.
    pub fn bind(&self, event: impl Into<EventId>) -> CommandBindingBuilder<'_> {
        CommandBindingBuilder {
            binder: self,
            event: event.into(),
            steps: Vec::new(),
            sequence: false,
            once: false,
            committed: false,
        }
    }

    pub fn unbind(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        let removed = self
            .bindings
            .write()
            .ok()
            .and_then(|mut guard| guard.remove(&event));
        match removed {
            Some(binding) => {
                binding.alive.store(false, Ordering::Release);
                self.diagnostics.log(
                    LogLevel::Debug,
                    targets::COMMAND,
                    "commands_unbound",
                    [json_str("event", event.as_str())],
                );
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, event: impl Into<EventId>) -> bool {
        let event = event.into();
        self.bindings
            .read()
            .map(|guard| guard.contains_key(&event))
            .unwrap_or(false)
    }

    pub fn descriptor_count(&self, event: impl Into<EventId>) -> usize {
        let event = event.into();
        self.bindings
            .read()
            .map(|guard| guard.get(&event).map_or(0, |binding| binding.descriptors.len()))
            .unwrap_or(0)
    }

    /// Drop every binding and cancel every pending continuation.
    pub fn clear(&self) {
        let drained: Vec<EventBinding> = self
            .bindings
            .write()
            .map(|mut guard| guard.drain().map(|(_, binding)| binding).collect())
            .unwrap_or_default();
        for binding in &drained {
            binding.alive.store(false, Ordering::Release);
        }
    }

    pub fn set_failure_reporter(&self, reporter: FailureReporter) {
        if let Ok(mut guard) = self.reporter.write() {
            *guard = Some(reporter);
        }
    }

    /// Drain the failures recorded since the last call.
    pub fn take_failures(&self) -> Vec<Arc<UnhandledCommandError>> {
        self.failures
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }

    /// Run every descriptor bound to `event.id()`.
    pub fn trigger(&self, event: &Event) {
        let runs: Vec<SequenceRun> = {
            let Ok(mut guard) = self.bindings.write() else {
                return;
            };
            let Some(binding) = guard.get_mut(event.id()) else {
                return;
            };
            let runs: Vec<SequenceRun> = binding
                .descriptors
                .iter()
                .map(|descriptor| {
                    SequenceRun::new(
                        event.clone(),
                        Arc::clone(&descriptor.steps),
                        Arc::clone(&binding.alive),
                    )
                })
                .collect();
            binding.descriptors.retain(|descriptor| !descriptor.once);
            if binding.descriptors.is_empty() {
                guard.remove(event.id());
            }
            runs
        };
        for run in runs {
            self.advance(run);
        }
    }

    /// Continue a suspended run once its completion token resolves.
    pub(crate) fn resume(&self, mut run: SequenceRun, outcome: Outcome) {
        run.in_flight = None;
        match outcome {
            Outcome::Complete => self.advance(run),
            Outcome::Halt => self.note_halt(&run),
            Outcome::Fail(err) => self.report(&run, run.current, err),
        }
    }

    fn advance(&self, mut run: SequenceRun) {
        loop {
            if !run.is_alive() {
                self.diagnostics.log(
                    LogLevel::Debug,
                    targets::COMMAND,
                    "sequence_cancelled",
                    [
                        json_str("event", run.event.id().as_str()),
                        json_kv("remaining", json!(run.remaining())),
                    ],
                );
                return;
            }
            let Some(spec) = run.steps.get(run.index) else {
                return;
            };
            let name = spec.name;
            let factory = Arc::clone(&spec.factory);
            run.current = name;

            let constructed = factory(&mut Injector::for_event(&self.injection, &run.event));
            let mut command = match constructed {
                Ok(command) => command,
                Err(err) => {
                    self.report(&run, name, err.into());
                    return;
                }
            };

            let (result, flow) = {
                let mut scope =
                    CommandScope::new(&run.event, self.me.clone(), Arc::clone(&run.alive));
                let result = command.execute(&mut scope);
                (result, scope.into_flow())
            };
            self.diagnostics.record(|metrics| metrics.record_command());
            self.diagnostics.log(
                LogLevel::Trace,
                targets::COMMAND,
                "command_executed",
                [
                    json_str("event", run.event.id().as_str()),
                    json_str("command", name),
                    json_kv("step", json!(run.index)),
                ],
            );
            if let Err(err) = result {
                self.report(&run, name, err);
                return;
            }
            run.index += 1;

            match flow {
                Flow::Continue => drop(command),
                Flow::Halt => {
                    drop(command);
                    self.note_halt(&run);
                    return;
                }
                Flow::Deferred(slot) => {
                    let Ok(mut guard) = slot.lock() else {
                        return;
                    };
                    match std::mem::replace(&mut *guard, Deferral::Done) {
                        Deferral::Waiting => {
                            run.in_flight = Some(command);
                            self.note_deferral(&run);
                            *guard = Deferral::Parked(run);
                            return;
                        }
                        Deferral::Resolved(outcome) => {
                            drop(guard);
                            drop(command);
                            match outcome {
                                Outcome::Complete => {}
                                Outcome::Halt => {
                                    self.note_halt(&run);
                                    return;
                                }
                                Outcome::Fail(err) => {
                                    self.report(&run, name, err);
                                    return;
                                }
                            }
                        }
                        other => {
                            *guard = other;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn note_halt(&self, run: &SequenceRun) {
        self.diagnostics.record(|metrics| metrics.record_sequence_halt());
        self.diagnostics.log(
            LogLevel::Debug,
            targets::COMMAND,
            "sequence_halted",
            [
                json_str("event", run.event.id().as_str()),
                json_str("command", run.current),
                json_kv("skipped", json!(run.remaining())),
            ],
        );
    }

    fn note_deferral(&self, run: &SequenceRun) {
        self.diagnostics.record(|metrics| metrics.record_sequence_deferral());
        self.diagnostics.log(
            LogLevel::Debug,
            targets::COMMAND,
            "command_deferred",
            [
                json_str("event", run.event.id().as_str()),
                json_str("command", run.current),
                json_kv("sequence", json!(run.is_sequence())),
            ],
        );
    }

    fn report(&self, run: &SequenceRun, command: &'static str, source: CommandError) {
        let failure = Arc::new(UnhandledCommandError {
            event: run.event.id().clone(),
            command,
            source,
        });
        self.diagnostics.record(|metrics| metrics.record_command_failure());
        self.diagnostics.log(
            LogLevel::Error,
            targets::COMMAND,
            "command_failed",
            [
                json_str("event", run.event.id().as_str()),
                json_str("command", command),
                json_str("error", failure.source.to_string()),
                json_kv("skipped", json!(run.remaining())),
            ],
        );
        if let Ok(mut guard) = self.failures.lock() {
            guard.push(Arc::clone(&failure));
        }
        let reporter = self.reporter.read().ok().and_then(|guard| guard.clone());
        if let Some(reporter) = reporter {
            reporter(&failure);
        }
    }

    fn commit(&self, event: EventId, steps: Vec<CommandSpec>, sequence: bool, once: bool) {
        if steps.is_empty() {
            return;
        }
        let count = steps.len();
        let descriptors: Vec<Descriptor> = if sequence {
            vec![Descriptor {
                steps: steps.into(),
                once,
            }]
        } else {
            steps
                .into_iter()
                .map(|spec| Descriptor {
                    steps: Arc::from(vec![spec]),
                    once,
                })
                .collect()
        };
        if let Ok(mut guard) = self.bindings.write() {
            let binding = guard.entry(event.clone()).or_insert_with(EventBinding::new);
            binding.descriptors.extend(descriptors);
        }
        self.diagnostics.log(
            LogLevel::Debug,
            targets::COMMAND,
            "commands_bound",
            [
                json_str("event", event.as_str()),
                json_kv("commands", json!(count)),
                json_kv("sequence", json!(sequence)),
                json_kv("once", json!(once)),
            ],
        );
    }
}

impl EventTrigger for CommandBinder {
    fn on_event(&self, event: &Event) {
        self.trigger(event);
    }
}

/// Builder returned by [`CommandBinder::bind`]. Commits on [`finish`] or
/// when dropped.
///
/// [`finish`]: CommandBindingBuilder::finish
pub struct CommandBindingBuilder<'b> {
    binder: &'b CommandBinder,
    event: EventId,
    steps: Vec<CommandSpec>,
    sequence: bool,
    once: bool,
    committed: bool,
}

impl<'b> CommandBindingBuilder<'b> {
    /// Append command `C`. Without [`in_sequence`](Self::in_sequence) every
    /// appended command is its own independent descriptor.
    pub fn to<C>(mut self) -> Self
    where
        C: Command + Injectable + 'static,
    {
        self.steps.push(CommandSpec {
            name: std::any::type_name::<C>(),
            factory: command_factory(|injector| {
                C::construct(injector).map(|command| Box::new(command) as Box<dyn Command>)
            }),
        });
        self
    }

    /// Run the appended commands as one ordered chain.
    pub fn in_sequence(mut self) -> Self {
        self.sequence = true;
        self
    }

    /// Drop the commands added by this builder after the event first fires.
    /// Other bindings of the same event are kept.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn finish(mut self) {
        self.commit();
    }

    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        let steps = std::mem::take(&mut self.steps);
        self.binder
            .commit(self.event.clone(), steps, self.sequence, self.once);
    }
}

impl Drop for CommandBindingBuilder<'_> {
    fn drop(&mut self) {
        self.commit();
    }
}
