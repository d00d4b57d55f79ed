//! Event bus keyed by event identifier.

mod core;

pub use self::core::{Event, EventDispatcher, EventId, EventTrigger, Listener, ListenerId, Payload};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::InjectionBinder;
    use std::sync::{Arc, Mutex, OnceLock, Weak};

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn dispatch_invokes_listeners_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let log = recorder();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            dispatcher.add_listener("CLICK", move |_| log.lock().unwrap().push(name.to_string()));
        }

        dispatcher.dispatch("CLICK");
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn payload_is_visible_to_listeners() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        dispatcher.add_listener("SCORE", move |event| {
            *sink.lock().unwrap() = event.payload::<u32>().copied();
        });

        dispatcher.dispatch_with("SCORE", 42u32);
        assert_eq!(*seen.lock().unwrap(), Some(42));

        dispatcher.dispatch("SCORE");
        assert_eq!(*seen.lock().unwrap(), None);
    }

    #[test]
    fn removal_during_dispatch_affects_only_the_next_pass() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let log = recorder();
        let victim_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());

        {
            let dispatcher_ref = Arc::downgrade(&dispatcher);
            let victim_id = victim_id.clone();
            let log = log.clone();
            dispatcher.add_listener("TICK", move |_| {
                log.lock().unwrap().push("remover".to_string());
                if let (Some(dispatcher), Some(id)) = (dispatcher_ref.upgrade(), victim_id.get()) {
                    dispatcher.remove_listener("TICK", *id);
                }
            });
        }
        let victim = {
            let log = log.clone();
            dispatcher.add_listener("TICK", move |_| log.lock().unwrap().push("victim".to_string()))
        };
        victim_id.set(victim).unwrap();

        dispatcher.dispatch("TICK");
        assert_eq!(*log.lock().unwrap(), vec!["remover", "victim"]);
        assert!(!dispatcher.has_listener("TICK", victim));

        log.lock().unwrap().clear();
        dispatcher.dispatch("TICK");
        assert_eq!(*log.lock().unwrap(), vec!["remover"]);
    }

    #[test]
    fn nested_dispatch_runs_depth_first() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let log = recorder();
        {
            let weak = Arc::downgrade(&dispatcher);
            let log = log.clone();
            dispatcher.add_listener("OUTER", move |_| {
                log.lock().unwrap().push("outer-1".to_string());
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.dispatch("INNER");
                }
            });
        }
        {
            let log = log.clone();
            dispatcher.add_listener("OUTER", move |_| log.lock().unwrap().push("outer-2".to_string()));
        }
        {
            let log = log.clone();
            dispatcher.add_listener("INNER", move |_| log.lock().unwrap().push("inner".to_string()));
        }

        dispatcher.dispatch("OUTER");
        assert_eq!(*log.lock().unwrap(), vec!["outer-1", "inner", "outer-2"]);
    }

    #[test]
    fn dispatchers_are_isolated() {
        let left = EventDispatcher::new();
        let right = EventDispatcher::new();
        let log = recorder();
        let sink = log.clone();
        right.add_listener("CLICK", move |_| sink.lock().unwrap().push("right".into()));

        left.dispatch("CLICK");
        assert!(log.lock().unwrap().is_empty());
        right.dispatch("CLICK");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn unnamed_binding_yields_fresh_dispatchers() {
        let binder = InjectionBinder::new();
        binder
            .bind::<EventDispatcher>()
            .to_type::<EventDispatcher>()
            .unwrap();
        let global = Arc::new(EventDispatcher::new());
        binder
            .bind::<EventDispatcher>()
            .named("global")
            .to_value(global.clone())
            .unwrap();

        let a = binder.get::<EventDispatcher>().unwrap();
        let b = binder.get::<EventDispatcher>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&binder.get_named::<EventDispatcher>("global").unwrap(), &global));
    }

    struct RecordingTrigger {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl EventTrigger for RecordingTrigger {
        fn on_event(&self, event: &Event) {
            self.log.lock().unwrap().push(format!("trigger:{}", event.id()));
        }
    }

    #[test]
    fn triggers_fire_before_listeners_and_are_held_weakly() {
        let dispatcher = EventDispatcher::new();
        let log = recorder();
        let trigger: Arc<dyn EventTrigger> = Arc::new(RecordingTrigger { log: log.clone() });
        let weak: Weak<dyn EventTrigger> = Arc::downgrade(&trigger);
        dispatcher.add_trigger(weak);
        {
            let log = log.clone();
            dispatcher.add_listener("GO", move |_| log.lock().unwrap().push("listener".into()));
        }

        dispatcher.dispatch("GO");
        assert_eq!(*log.lock().unwrap(), vec!["trigger:GO", "listener"]);

        drop(trigger);
        log.lock().unwrap().clear();
        dispatcher.dispatch("GO");
        assert_eq!(*log.lock().unwrap(), vec!["listener"]);
    }

    #[test]
    fn remove_all_listeners_reports_count() {
        let dispatcher = EventDispatcher::new();
        dispatcher.add_listener("A", |_| {});
        dispatcher.add_listener("A", |_| {});
        assert_eq!(dispatcher.listener_count("A"), 2);
        assert_eq!(dispatcher.remove_all_listeners("A"), 2);
        assert_eq!(dispatcher.listener_count("A"), 0);
    }
}
