use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{Criterion, criterion_group, criterion_main};
use mvcs_context::logging::NullSink;
use mvcs_context::{
    Binders, Command, CommandResult, CommandScope, Context, ContextConfig, EventDispatcher,
    InjectResult, Injectable, Injector, Logger, Result,
};

#[derive(Default)]
struct Tally(AtomicU64);

struct TallyCommand {
    tally: Arc<Tally>,
}

impl Injectable for TallyCommand {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self {
            tally: injector.get::<Tally>()?,
        })
    }
}

impl Command for TallyCommand {
    fn execute(&mut self, _: &mut CommandScope<'_>) -> CommandResult<()> {
        self.tally.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn listener_fanout(c: &mut Criterion) {
    let dispatcher = EventDispatcher::new();
    let tally = Arc::new(Tally::default());
    for _ in 0..16 {
        let tally = Arc::clone(&tally);
        dispatcher.add_listener("TICK", move |_| {
            tally.0.fetch_add(1, Ordering::Relaxed);
        });
    }
    c.bench_function("dispatch_16_listeners", |b| {
        b.iter(|| dispatcher.dispatch_with(black_box("TICK"), black_box(7u32)));
    });
}

fn build_context(tally: Arc<Tally>) -> Result<Context> {
    let config = ContextConfig::default().with_logger(Logger::new(NullSink));
    Context::new(
        move |binders: &Binders<'_>| -> Result<()> {
            binders.injection.bind::<Tally>().to_value(Arc::clone(&tally))?;
            binders
                .commands
                .bind("SEQUENCE")
                .to::<TallyCommand>()
                .to::<TallyCommand>()
                .to::<TallyCommand>()
                .in_sequence()
                .finish();
            Ok(())
        },
        config,
    )
}

fn command_sequence(c: &mut Criterion) {
    let tally = Arc::new(Tally::default());
    let context = build_context(Arc::clone(&tally)).expect("context");
    c.bench_function("three_step_sequence", |b| {
        b.iter(|| context.dispatch(black_box("SEQUENCE")));
    });
}

fn context_lifecycle(c: &mut Criterion) {
    c.bench_function("context_start_destroy", |b| {
        b.iter(|| {
            let mut context = build_context(Arc::new(Tally::default())).expect("context");
            context.destroy();
        });
    });
}

criterion_group!(benches, listener_fanout, command_sequence, context_lifecycle);
criterion_main!(benches);
