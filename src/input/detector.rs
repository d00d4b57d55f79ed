use std::sync::{Arc, OnceLock};

use crossterm::event::{Event as CrosstermEvent, KeyModifiers, MouseButton, MouseEventKind};

use crate::dispatcher::EventDispatcher;
use crate::error::InjectResult;
use crate::injection::Injector;
use crate::mediation::View;

/// Event dispatched by a [`ClickDetector`] on its local dispatcher.
pub const CLICK: &str = "input.click";

/// Payload of a `CLICK` event, in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerClick {
    pub column: u16,
    pub row: u16,
    pub modifiers: KeyModifiers,
}

/// Screen region a detector reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub column: u16,
    pub row: u16,
    pub width: u16,
    pub height: u16,
}

impl Region {
    pub fn new(column: u16, row: u16, width: u16, height: u16) -> Self {
        Self {
            column,
            row,
            width,
            height,
        }
    }

    pub fn contains(&self, column: u16, row: u16) -> bool {
        column >= self.column
            && row >= self.row
            && u32::from(column) < u32::from(self.column) + u32::from(self.width)
            && u32::from(row) < u32::from(self.row) + u32::from(self.height)
    }
}

/// View that turns left-button presses into `CLICK` events.
///
/// The detector owns a private dispatcher obtained from the unnamed
/// `EventDispatcher` binding when it activates. Its mediator listens there;
/// nothing else sees the clicks unless the mediator relays them.
pub struct ClickDetector {
    name: String,
    region: Option<Region>,
    dispatcher: OnceLock<Arc<EventDispatcher>>,
}

impl ClickDetector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            dispatcher: OnceLock::new(),
        }
    }

    /// Only react to clicks inside `region`.
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    /// Local dispatcher, once injected.
    pub fn dispatcher(&self) -> Option<&Arc<EventDispatcher>> {
        self.dispatcher.get()
    }

    /// Feed a raw terminal event. Returns `true` when a `CLICK` was dispatched.
    pub fn handle_input(&self, event: &CrosstermEvent) -> bool {
        let CrosstermEvent::Mouse(mouse) = event else {
            return false;
        };
        if mouse.kind != MouseEventKind::Down(MouseButton::Left) {
            return false;
        }
        if let Some(region) = self.region {
            if !region.contains(mouse.column, mouse.row) {
                return false;
            }
        }
        let Some(dispatcher) = self.dispatcher.get() else {
            return false;
        };
        dispatcher.dispatch_with(
            CLICK,
            PointerClick {
                column: mouse.column,
                row: mouse.row,
                modifiers: mouse.modifiers,
            },
        );
        true
    }
}

impl View for ClickDetector {
    fn view_name(&self) -> &str {
        &self.name
    }

    fn on_inject(&self, injector: &mut Injector<'_>) -> InjectResult<()> {
        if self.dispatcher.get().is_none() {
            let dispatcher = injector.get::<EventDispatcher>()?;
            let _ = self.dispatcher.set(dispatcher);
        }
        Ok(())
    }
}
