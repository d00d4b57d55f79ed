use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::json;

use crate::diagnostics::Diagnostics;
use crate::error::InjectResult;
use crate::injection::{Injectable, Injector};
use crate::logging::{LogLevel, json_kv, json_str, targets};

/// Identifier of an event. Usually a `&'static str` constant.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(Cow<'static, str>);

impl EventId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for EventId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&EventId> for EventId {
    fn from(id: &EventId) -> Self {
        id.clone()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({:?})", self.0)
    }
}

pub type Payload = Arc<dyn Any + Send + Sync>;

/// A dispatched event: identifier plus optional payload.
#[derive(Clone)]
pub struct Event {
    id: EventId,
    payload: Option<Payload>,
}

impl Event {
    pub fn new(id: impl Into<EventId>) -> Self {
        Self {
            id: id.into(),
            payload: None,
        }
    }

    pub fn with_payload<T>(id: impl Into<EventId>, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::with_shared(id, Arc::new(payload))
    }

    pub fn with_shared(id: impl Into<EventId>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|value| value.downcast_ref::<T>())
    }

    pub fn shared_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`EventDispatcher::add_listener`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Receives every event a dispatcher fires, before plain listeners do.
pub trait EventTrigger: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Synchronous publish/subscribe bus.
///
/// Handlers run in registration order on the dispatching thread. The handler
/// list is snapshotted when a dispatch starts, so listeners added or removed
/// mid-dispatch only take effect from the next dispatch. Nested dispatches
/// complete depth-first.
pub struct EventDispatcher {
    listeners: RwLock<HashMap<EventId, Vec<(ListenerId, Listener)>>>,
    triggers: RwLock<Vec<Weak<dyn EventTrigger>>>,
    next_id: AtomicU64,
    diagnostics: Diagnostics,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::with_diagnostics(Diagnostics::silent())
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            triggers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            diagnostics,
        }
    }

    pub fn add_listener<F>(&self, id: impl Into<EventId>, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add_shared_listener(id, Arc::new(handler))
    }

    pub fn add_shared_listener(&self, id: impl Into<EventId>, handler: Listener) -> ListenerId {
        let listener_id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut guard) = self.listeners.write() {
            guard
                .entry(id.into())
                .or_default()
                .push((listener_id, handler));
        }
        listener_id
    }

    pub fn remove_listener(&self, id: impl Into<EventId>, listener: ListenerId) -> bool {
        let id = id.into();
        let Ok(mut guard) = self.listeners.write() else {
            return false;
        };
        let Some(handlers) = guard.get_mut(&id) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != listener);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            guard.remove(&id);
        }
        removed
    }

    pub fn remove_all_listeners(&self, id: impl Into<EventId>) -> usize {
        self.listeners
            .write()
            .ok()
            .and_then(|mut guard| guard.remove(&id.into()))
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn has_listener(&self, id: impl Into<EventId>, listener: ListenerId) -> bool {
        let id = id.into();
        self.listeners
            .read()
            .map(|guard| {
                guard
                    .get(&id)
                    .is_some_and(|handlers| handlers.iter().any(|(existing, _)| *existing == listener))
            })
            .unwrap_or(false)
    }

    pub fn listener_count(&self, id: impl Into<EventId>) -> usize {
        let id = id.into();
        self.listeners
            .read()
            .map(|guard| guard.get(&id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Register a trigger. Held weakly: a dropped trigger is pruned on the next dispatch.
    pub fn add_trigger(&self, trigger: Weak<dyn EventTrigger>) {
        if let Ok(mut guard) = self.triggers.write() {
            guard.push(trigger);
        }
    }

    pub fn remove_trigger(&self, trigger: &Weak<dyn EventTrigger>) {
        if let Ok(mut guard) = self.triggers.write() {
            guard.retain(|existing| !Weak::ptr_eq(existing, trigger));
        }
    }

    pub fn dispatch(&self, id: impl Into<EventId>) {
        self.dispatch_event(&Event::new(id));
    }

    pub fn dispatch_with<T>(&self, id: impl Into<EventId>, payload: T)
    where
        T: Any + Send + Sync,
    {
        self.dispatch_event(&Event::with_payload(id, payload));
    }

    pub fn dispatch_event(&self, event: &Event) {
        let triggers = self.live_triggers();
        let handlers = self.snapshot(event.id());

        self.diagnostics.record(|metrics| metrics.record_dispatch());
        self.diagnostics.log(
            LogLevel::Trace,
            targets::DISPATCHER,
            "event_dispatched",
            [
                json_str("event", event.id().as_str()),
                json_kv("listeners", json!(handlers.len())),
                json_kv("triggers", json!(triggers.len())),
            ],
        );

        for trigger in triggers {
            trigger.on_event(event);
        }
        for handler in handlers {
            handler(event);
        }
    }

    /// Drop every listener and trigger.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.listeners.write() {
            guard.clear();
        }
        if let Ok(mut guard) = self.triggers.write() {
            guard.clear();
        }
    }

    fn snapshot(&self, id: &EventId) -> Vec<Listener> {
        self.listeners
            .read()
            .map(|guard| {
                guard
                    .get(id)
                    .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn live_triggers(&self) -> Vec<Arc<dyn EventTrigger>> {
        let Ok(mut guard) = self.triggers.write() else {
            return Vec::new();
        };
        guard.retain(|trigger| trigger.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }
}

/// An unnamed `EventDispatcher` binding hands out fresh, isolated buses that
/// share the binder's diagnostics.
impl Injectable for EventDispatcher {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
        Ok(Self::with_diagnostics(injector.binder().diagnostics().clone()))
    }
}
