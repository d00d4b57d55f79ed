use std::io;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, MouseEvent};
use serde_json::json;

use crate::context::ContextKeys;
use crate::diagnostics::Diagnostics;
use crate::dispatcher::EventDispatcher;
use crate::error::InjectResult;
use crate::injection::{Injectable, Injector};
use crate::logging::{LogLevel, json_kv, json_str, targets};

use super::detector::ClickDetector;

/// Event ids the bridge dispatches. Each carries an [`InputSignal`] payload.
pub mod input_events {
    pub const KEY: &str = "input.key";
    pub const MOUSE: &str = "input.mouse";
    pub const RESIZE: &str = "input.resize";
    pub const PASTE: &str = "input.paste";
    pub const FOCUS: &str = "input.focus";
}

/// Terminal input translated for the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSignal {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize { width: u16, height: u16 },
    Paste(String),
    Focus(bool),
}

impl InputSignal {
    pub fn event_id(&self) -> &'static str {
        match self {
            InputSignal::Key(_) => input_events::KEY,
            InputSignal::Mouse(_) => input_events::MOUSE,
            InputSignal::Resize { .. } => input_events::RESIZE,
            InputSignal::Paste(_) => input_events::PASTE,
            InputSignal::Focus(_) => input_events::FOCUS,
        }
    }
}

impl From<CrosstermEvent> for InputSignal {
    fn from(event: CrosstermEvent) -> Self {
        match event {
            CrosstermEvent::Key(key) => InputSignal::Key(key),
            CrosstermEvent::Mouse(mouse) => InputSignal::Mouse(mouse),
            CrosstermEvent::Paste(data) => InputSignal::Paste(data),
            CrosstermEvent::FocusGained => InputSignal::Focus(true),
            CrosstermEvent::FocusLost => InputSignal::Focus(false),
            CrosstermEvent::Resize(width, height) => InputSignal::Resize { width, height },
        }
    }
}

/// Raw input source feeding the framework: forwards terminal events to a
/// dispatcher and lets registered click detectors see them first.
///
/// Detectors are held weakly. One that has been dropped stops receiving
/// input and is pruned on the next forward.
pub struct InputBridge {
    dispatcher: Arc<EventDispatcher>,
    detectors: RwLock<Vec<Weak<ClickDetector>>>,
    diagnostics: Diagnostics,
}

impl InputBridge {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self::with_diagnostics(dispatcher, Diagnostics::silent())
    }

    pub fn with_diagnostics(dispatcher: Arc<EventDispatcher>, diagnostics: Diagnostics) -> Self {
        Self {
            dispatcher,
            detectors: RwLock::new(Vec::new()),
            diagnostics,
        }
    }

    pub fn add_detector(&self, detector: &Arc<ClickDetector>) {
        if let Ok(mut guard) = self.detectors.write() {
            guard.push(Arc::downgrade(detector));
        }
    }

    /// Stop feeding `detector`. Returns whether it was registered.
    pub fn remove_detector(&self, detector: &Arc<ClickDetector>) -> bool {
        let target = Arc::downgrade(detector);
        let Ok(mut guard) = self.detectors.write() else {
            return false;
        };
        let before = guard.len();
        guard.retain(|held| !Weak::ptr_eq(held, &target));
        guard.len() != before
    }

    /// Detectors that are still alive.
    pub fn detector_count(&self) -> usize {
        self.detectors
            .read()
            .map(|guard| guard.iter().filter(|held| held.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Deliver one terminal event. Returns how many detectors produced a click.
    pub fn forward(&self, event: CrosstermEvent) -> usize {
        let detectors: Vec<Arc<ClickDetector>> = match self.detectors.write() {
            Ok(mut guard) => {
                guard.retain(|held| held.strong_count() > 0);
                guard.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        };
        let clicks = detectors
            .iter()
            .filter(|detector| detector.handle_input(&event))
            .count();

        let signal = InputSignal::from(event);
        let id = signal.event_id();
        self.diagnostics.log(
            LogLevel::Trace,
            targets::INPUT,
            "input_forwarded",
            [json_str("event", id), json_kv("clicks", json!(clicks))],
        );
        self.dispatcher.dispatch_with(id, signal);
        clicks
    }

    /// Wait up to `timeout` for one terminal event and forward it.
    /// Returns whether an event arrived.
    pub fn pump(&self, timeout: Duration) -> io::Result<bool> {
        if !event::poll(timeout)? {
            return Ok(false);
        }
        let raw = event::read()?;
        self.forward(raw);
        Ok(true)
    }
}

/// Resolves against the context's global dispatcher.
impl Injectable for InputBridge {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        let dispatcher = injector.get_named::<EventDispatcher>(ContextKeys::CONTEXT_DISPATCHER)?;
        let diagnostics = injector.binder().diagnostics().clone();
        Ok(Self::with_diagnostics(dispatcher, diagnostics))
    }
}
