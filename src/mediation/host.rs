use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::dispatcher::{Event, Listener};

use super::view::{View, ViewId};

/// Observer of view activation and deactivation signals.
pub trait ViewLifecycle: Send + Sync {
    fn view_activated(&self, view: &Arc<dyn View>);
    fn view_deactivated(&self, view: &Arc<dyn View>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// The component-lifecycle system hosting the views.
pub trait LifecycleHost: Send + Sync {
    fn attach(&self, observer: Arc<dyn ViewLifecycle>) -> ObserverId;
    fn detach(&self, id: ObserverId) -> bool;
}

/// Liveness flag shared between a mediator and its pending continuations.
/// Once cut, guarded callbacks do nothing.
#[derive(Debug, Clone)]
pub struct Lifeline {
    alive: Arc<AtomicBool>,
}

impl Default for Lifeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifeline {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn cut(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Wrap an event listener so it stops firing once the lifeline is cut.
    pub fn guard_listener<F>(&self, handler: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let lifeline = self.clone();
        Arc::new(move |event: &Event| {
            if lifeline.is_alive() {
                handler(event);
            }
        })
    }

    /// Wrap a one-shot continuation. Returns `true` from the wrapper if it ran.
    pub fn guard_once<F>(&self, continuation: F) -> Box<dyn FnOnce() -> bool + Send>
    where
        F: FnOnce() + Send + 'static,
    {
        let lifeline = self.clone();
        Box::new(move || {
            if lifeline.is_alive() {
                continuation();
                true
            } else {
                false
            }
        })
    }
}

/// In-process host that owns live views and broadcasts their lifecycle.
///
/// Observers attached after views spawned are replayed an activation for
/// each live view, so a context that starts late still mediates them.
#[derive(Default)]
pub struct ViewHost {
    views: Mutex<Vec<Arc<dyn View>>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn ViewLifecycle>)>>,
    next_id: AtomicU64,
}

impl ViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, view: Arc<dyn View>) -> ViewId {
        let id = ViewId::of(&view);
        if let Ok(mut guard) = self.views.lock() {
            guard.push(Arc::clone(&view));
        }
        for observer in self.observers_snapshot() {
            observer.view_activated(&view);
        }
        id
    }

    pub fn despawn(&self, id: ViewId) -> bool {
        let removed = self.views.lock().ok().and_then(|mut guard| {
            let index = guard.iter().position(|view| ViewId::of(view) == id)?;
            Some(guard.remove(index))
        });
        let Some(view) = removed else {
            return false;
        };
        for observer in self.observers_snapshot() {
            observer.view_deactivated(&view);
        }
        true
    }

    pub fn despawn_all(&self) -> usize {
        let ids: Vec<ViewId> = self
            .views
            .lock()
            .map(|guard| guard.iter().map(ViewId::of).collect())
            .unwrap_or_default();
        ids.into_iter().filter(|id| self.despawn(*id)).count()
    }

    pub fn live_count(&self) -> usize {
        self.views.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().map(|guard| guard.len()).unwrap_or(0)
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn ViewLifecycle>> {
        self.observers
            .read()
            .map(|guard| guard.iter().map(|(_, observer)| Arc::clone(observer)).collect())
            .unwrap_or_default()
    }
}

impl LifecycleHost for ViewHost {
    fn attach(&self, observer: Arc<dyn ViewLifecycle>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut guard) = self.observers.write() {
            guard.push((id, Arc::clone(&observer)));
        }
        let live: Vec<_> = self
            .views
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        for view in live {
            observer.view_activated(&view);
        }
        id
    }

    fn detach(&self, id: ObserverId) -> bool {
        let Ok(mut guard) = self.observers.write() else {
            return false;
        };
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }
}
