//! Scripted walkthrough of a click-driven context.
//!
//! A `ClickDetector` view is mediated by `ClickMediator`, which relays clicks
//! to the global bus as `REQUEST_WEB_SERVICE`. That event runs a two-step
//! sequence whose first command waits on a mock web service.
//!
//! Run with `cargo run --example click_context`.

use std::sync::{Arc, Mutex};

use crossterm::event::{Event as CrosstermEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use mvcs_context::input::CLICK;
use mvcs_context::logging::MemorySink;
use mvcs_context::{
    Binders, ClickDetector, Command, CommandResult, CommandScope, Context, ContextBindings,
    ContextConfig, ContextEvent, ContextKeys, EventDispatcher, InjectResult, Injectable,
    InjectionError, Injector, InputBridge, Lifeline, LogLevel, Logger, MediationResult, Mediator,
    Region, Result, View, ViewHost,
};

const REQUEST_WEB_SERVICE: &str = "example.request_web_service";

trait ExampleModel: Send + Sync {
    fn data(&self) -> String;
    fn set_data(&self, data: String);
}

#[derive(Default)]
struct InMemoryModel {
    data: Mutex<String>,
}

impl Injectable for InMemoryModel {
    fn construct(_: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self::default())
    }
}

impl ExampleModel for InMemoryModel {
    fn data(&self) -> String {
        self.data.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    fn set_data(&self, data: String) {
        if let Ok(mut guard) = self.data.lock() {
            *guard = data;
        }
    }
}

mvcs_context::provides!(InMemoryModel => dyn ExampleModel);

type Reply = Box<dyn FnOnce(String) + Send>;

/// Queues requests until `flush` plays the network's part.
#[derive(Default)]
struct MockWebService {
    pending: Mutex<Vec<(String, Reply)>>,
}

impl MockWebService {
    fn fetch(&self, url: &str, reply: impl FnOnce(String) + Send + 'static) {
        if let Ok(mut guard) = self.pending.lock() {
            guard.push((url.to_string(), Box::new(reply)));
        }
    }

    fn flush(&self) -> usize {
        let pending = self
            .pending
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        let count = pending.len();
        for (url, reply) in pending {
            reply(format!("200 OK from {url}"));
        }
        count
    }
}

impl Injectable for MockWebService {
    fn construct(_: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self::default())
    }
}

struct StartCommand {
    model: Arc<dyn ExampleModel>,
}

impl Injectable for StartCommand {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self {
            model: injector.get::<dyn ExampleModel>()?,
        })
    }
}

impl Command for StartCommand {
    fn execute(&mut self, _: &mut CommandScope<'_>) -> CommandResult<()> {
        self.model.set_data("waiting for clicks".to_string());
        println!("context started: {}", self.model.data());
        Ok(())
    }
}

struct CallWebServiceCommand {
    url: String,
    model: Arc<dyn ExampleModel>,
    service: Arc<MockWebService>,
}

impl Injectable for CallWebServiceCommand {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        let url = injector
            .payload::<String>()
            .cloned()
            .ok_or_else(|| InjectionError::construction::<Self>("request carries no url"))?;
        Ok(Self {
            url,
            model: injector.get::<dyn ExampleModel>()?,
            service: injector.get::<MockWebService>()?,
        })
    }
}

impl Command for CallWebServiceCommand {
    fn execute(&mut self, scope: &mut CommandScope<'_>) -> CommandResult<()> {
        let token = scope.defer();
        let model = Arc::clone(&self.model);
        println!("requesting {}", self.url);
        self.service.fetch(&self.url, move |body| {
            model.set_data(body);
            token.complete();
        });
        Ok(())
    }
}

struct ShowResultCommand {
    model: Arc<dyn ExampleModel>,
}

impl Injectable for ShowResultCommand {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self {
            model: injector.get::<dyn ExampleModel>()?,
        })
    }
}

impl Command for ShowResultCommand {
    fn execute(&mut self, _: &mut CommandScope<'_>) -> CommandResult<()> {
        println!("web service replied: {}", self.model.data());
        Ok(())
    }
}

struct ClickMediator {
    view: Arc<ClickDetector>,
    global: Arc<EventDispatcher>,
    lifeline: Option<Lifeline>,
}

impl Injectable for ClickMediator {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self {
            view: injector.view::<ClickDetector>()?,
            global: injector.get_named::<EventDispatcher>(ContextKeys::CONTEXT_DISPATCHER)?,
            lifeline: injector.lifeline(),
        })
    }
}

impl Mediator for ClickMediator {
    fn on_register(&mut self) -> MediationResult<()> {
        let (Some(local), Some(lifeline)) = (self.view.dispatcher(), self.lifeline.as_ref()) else {
            return Ok(());
        };
        let global = Arc::clone(&self.global);
        local.add_shared_listener(
            CLICK,
            lifeline.guard_listener(move |_| {
                global.dispatch_with(REQUEST_WEB_SERVICE, "https://example.test/score".to_string());
            }),
        );
        println!("mediating {}", self.view.view_name());
        Ok(())
    }

    fn on_remove(&mut self) -> MediationResult<()> {
        println!("released mediator");
        Ok(())
    }
}

struct ExampleContext;

impl ContextBindings for ExampleContext {
    fn map_bindings(&self, binders: &Binders<'_>) -> Result<()> {
        binders
            .injection
            .bind::<EventDispatcher>()
            .to_type::<EventDispatcher>()?;
        binders
            .injection
            .bind::<dyn ExampleModel>()
            .to_type::<InMemoryModel>()?
            .as_singleton()?;
        binders
            .injection
            .bind::<MockWebService>()
            .to_type::<MockWebService>()?
            .as_singleton()?;
        binders
            .injection
            .bind::<InputBridge>()
            .to_type::<InputBridge>()?
            .as_singleton()?;

        binders.mediation.bind::<ClickDetector>().to::<ClickMediator>()?;

        binders
            .commands
            .bind(ContextEvent::START)
            .to::<StartCommand>()
            .finish();
        binders
            .commands
            .bind(REQUEST_WEB_SERVICE)
            .to::<CallWebServiceCommand>()
            .to::<ShowResultCommand>()
            .in_sequence()
            .finish();
        Ok(())
    }
}

fn left_click(column: u16, row: u16) -> CrosstermEvent {
    CrosstermEvent::Mouse(MouseEvent {
        kind: MouseEventKind::Down(MouseButton::Left),
        column,
        row,
        modifiers: KeyModifiers::NONE,
    })
}

fn main() -> Result<()> {
    let sink = MemorySink::new();
    let host = Arc::new(ViewHost::new());
    let detector = Arc::new(ClickDetector::new("score-button").with_region(Region::new(0, 0, 10, 3)));
    let detector_id = host.spawn(detector.clone());

    let mut config = ContextConfig::default()
        .with_host(host.clone())
        .with_logger(Logger::new(sink.clone()).with_min_level(LogLevel::Debug));
    config.enable_metrics();
    let mut context = Context::new(ExampleContext, config)?;

    let bridge = context.injection_binder().get::<InputBridge>()?;
    bridge.add_detector(&detector);
    bridge.forward(left_click(3, 1));
    bridge.forward(left_click(40, 20));

    let service = context.injection_binder().get::<MockWebService>()?;
    println!("network delivered {} response(s)", service.flush());

    host.despawn(detector_id);
    bridge.remove_detector(&detector);
    if let Some(snapshot) = context.metrics_snapshot() {
        println!(
            "dispatches={} commands={} deferred={}",
            snapshot.dispatches, snapshot.commands_executed, snapshot.sequences_deferred
        );
    }
    context.destroy();
    println!("observers left on host: {}", host.observer_count());

    for line in sink.lines().unwrap_or_default() {
        println!("{line}");
    }
    Ok(())
}
