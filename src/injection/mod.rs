//! Typed dependency-injection container.
//!
//! Abstractions are keyed by `TypeId` (optionally with a name) and resolved to
//! `Arc<A>`, where `A` is usually a `dyn Trait`. Concrete types register their
//! own constructor through [`Injectable`]; nothing is built by reflection.

mod core;
mod injector;

pub use self::core::{BindingBuilder, BindingHandle, BindingKey, BindingPolicy, InjectionBinder};
pub use self::injector::{Injectable, Injector, Provide};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InjectResult, InjectionError};
    use crate::metrics::ContextMetrics;
    use crate::diagnostics::Diagnostics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Counter {
        fn next(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn total(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    trait ExampleModel: Send + Sync {
        fn id(&self) -> usize;
    }

    struct CountingModel {
        id: usize,
    }

    impl Injectable for CountingModel {
        fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
            let counter = injector.get::<Counter>()?;
            Ok(Self { id: counter.next() })
        }
    }

    impl ExampleModel for CountingModel {
        fn id(&self) -> usize {
            self.id
        }
    }

    crate::provides!(CountingModel => dyn ExampleModel);

    fn binder_with_counter() -> (InjectionBinder, Arc<Counter>) {
        let binder = InjectionBinder::new();
        let counter = Arc::new(Counter::default());
        binder.bind::<Counter>().to_value(counter.clone()).unwrap();
        (binder, counter)
    }

    #[test]
    fn singleton_resolves_to_same_instance() {
        let (binder, counter) = binder_with_counter();
        binder
            .bind::<dyn ExampleModel>()
            .to_type::<CountingModel>()
            .unwrap()
            .as_singleton()
            .unwrap();

        let first = binder.get::<dyn ExampleModel>().unwrap();
        let second = binder.get::<dyn ExampleModel>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn transient_resolves_to_distinct_instances() {
        let (binder, counter) = binder_with_counter();
        binder
            .bind::<dyn ExampleModel>()
            .to_type::<CountingModel>()
            .unwrap();

        let first = binder.get::<dyn ExampleModel>().unwrap();
        let second = binder.get::<dyn ExampleModel>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.id(), second.id());
        assert_eq!(counter.total(), 2);
    }

    #[test]
    fn unbound_abstraction_is_an_error() {
        let binder = InjectionBinder::new();
        let err = binder.get::<dyn ExampleModel>().err().unwrap();
        assert!(matches!(err, InjectionError::UnboundAbstraction { name: None, .. }));

        let err = binder.get_named::<Counter>("missing").err().unwrap();
        match err {
            InjectionError::UnboundAbstraction { name, .. } => {
                assert_eq!(name.as_deref(), Some("missing"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn strict_policy_rejects_rebinding() {
        let (binder, _) = binder_with_counter();
        let err = binder
            .bind::<Counter>()
            .to_value(Arc::new(Counter::default()))
            .err()
            .unwrap();
        assert!(matches!(err, InjectionError::DuplicateBinding { .. }));

        binder
            .bind::<Counter>()
            .replacing()
            .to_value(Arc::new(Counter::default()))
            .unwrap();
        assert_eq!(binder.binding_count(), 1);
    }

    #[test]
    fn replace_policy_overwrites() {
        let binder = InjectionBinder::with_policy(BindingPolicy::Replace);
        binder.bind::<usize>().to_value(Arc::new(1)).unwrap();
        binder.bind::<usize>().to_value(Arc::new(2)).unwrap();
        assert_eq!(*binder.get::<usize>().unwrap(), 2);
    }

    #[test]
    fn named_bindings_are_independent() {
        let binder = InjectionBinder::new();
        binder.bind::<String>().to_value(Arc::new("default".into())).unwrap();
        binder
            .bind::<String>()
            .named("alt")
            .to_value(Arc::new("alt".into()))
            .unwrap();

        assert_eq!(binder.get::<String>().unwrap().as_str(), "default");
        assert_eq!(binder.get_named::<String>("alt").unwrap().as_str(), "alt");
        assert!(binder.is_bound_named::<String>("alt"));
        assert!(!binder.is_bound_named::<String>("other"));
    }

    struct Alpha {
        _beta: Arc<Beta>,
    }

    struct Beta {
        _alpha: Arc<Alpha>,
    }

    impl Injectable for Alpha {
        fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
            Ok(Self {
                _beta: injector.get::<Beta>()?,
            })
        }
    }

    impl Injectable for Beta {
        fn construct(injector: &mut Injector<'_>) -> InjectResult<Self> {
            Ok(Self {
                _alpha: injector.get::<Alpha>()?,
            })
        }
    }

    #[test]
    fn circular_dependency_is_detected() {
        let binder = InjectionBinder::new();
        binder
            .bind::<Alpha>()
            .to_type::<Alpha>()
            .unwrap()
            .as_singleton()
            .unwrap();
        binder.bind::<Beta>().to_type::<Beta>().unwrap();

        let err = binder.get::<Alpha>().err().unwrap();
        match err {
            InjectionError::CircularDependency { chain } => {
                assert_eq!(chain.matches("Alpha").count(), 2);
                assert!(chain.contains("Beta"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // A failed singleton construction leaves nothing cached.
        assert!(!binder.reset_singleton::<Alpha>().unwrap());
    }

    #[test]
    fn reset_singleton_constructs_a_new_instance() {
        let (binder, counter) = binder_with_counter();
        binder
            .bind::<dyn ExampleModel>()
            .to_type::<CountingModel>()
            .unwrap()
            .as_singleton()
            .unwrap();

        let first = binder.get::<dyn ExampleModel>().unwrap();
        let again = binder.get::<dyn ExampleModel>().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert!(binder.reset_singleton::<dyn ExampleModel>().unwrap());
        let fresh = binder.get::<dyn ExampleModel>().unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(counter.total(), 2);
    }

    #[test]
    fn unbind_removes_binding() {
        let (binder, _) = binder_with_counter();
        assert!(binder.unbind::<Counter>().unwrap());
        assert!(!binder.unbind::<Counter>().unwrap());
        assert!(matches!(
            binder.get::<Counter>(),
            Err(InjectionError::UnboundAbstraction { .. })
        ));
    }

    #[test]
    fn release_singletons_keeps_bindings() {
        let (binder, counter) = binder_with_counter();
        binder
            .bind::<dyn ExampleModel>()
            .to_type::<CountingModel>()
            .unwrap()
            .as_singleton()
            .unwrap();
        binder.get::<dyn ExampleModel>().unwrap();

        assert_eq!(binder.release_singletons().unwrap(), 1);
        binder.get::<dyn ExampleModel>().unwrap();
        assert_eq!(counter.total(), 2);
        assert!(binder.is_bound::<dyn ExampleModel>());
    }

    #[test]
    fn try_get_tolerates_missing_bindings() {
        let binder = InjectionBinder::new();
        let mut injector = binder.injector();
        assert!(injector.try_get::<Counter>().unwrap().is_none());
    }

    #[test]
    fn factory_errors_are_wrapped() {
        let binder = InjectionBinder::new();
        binder
            .bind::<String>()
            .to_factory(|_| Err(InjectionError::construction::<String>("offline")))
            .unwrap();

        let err = binder.get::<String>().err().unwrap();
        assert!(err.to_string().contains("offline"));
    }

    #[test]
    fn singleton_construction_is_counted_once() {
        let metrics = ContextMetrics::shared();
        let binder = InjectionBinder::with_diagnostics(
            BindingPolicy::Strict,
            Diagnostics::silent().with_metrics(metrics.clone()),
        );
        binder.bind::<Counter>().to_value(Arc::new(Counter::default())).unwrap();
        binder
            .bind::<dyn ExampleModel>()
            .to_type::<CountingModel>()
            .unwrap()
            .as_singleton()
            .unwrap();

        for _ in 0..5 {
            binder.get::<dyn ExampleModel>().unwrap();
        }
        let snapshot = metrics.lock().unwrap().snapshot(Default::default());
        assert_eq!(snapshot.singletons_constructed, 1);
    }

    #[test]
    fn singleton_reentry_through_binder_is_circular() {
        let binder = InjectionBinder::new();
        binder
            .bind::<u32>()
            .to_factory(|injector| {
                let again = injector.binder().get::<u32>();
                match again {
                    Err(InjectionError::CircularDependency { chain }) => {
                        assert!(chain.contains("u32"));
                        Ok(Arc::new(7))
                    }
                    other => panic!("expected a cycle, got {:?}", other.map(|v| *v)),
                }
            })
            .unwrap()
            .as_singleton()
            .unwrap();

        assert_eq!(*binder.get::<u32>().unwrap(), 7);
        // The nested failure did not disturb the outer construction.
        assert_eq!(*binder.get::<u32>().unwrap(), 7);
    }

    #[test]
    fn concurrent_resolution_builds_one_singleton() {
        let metrics = ContextMetrics::shared();
        let binder = Arc::new(InjectionBinder::with_diagnostics(
            BindingPolicy::Strict,
            Diagnostics::silent().with_metrics(metrics.clone()),
        ));
        let builds = Arc::new(AtomicUsize::new(0));
        {
            let builds = builds.clone();
            binder
                .bind::<String>()
                .to_factory(move |_| {
                    builds.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    Ok(Arc::new("shared".to_string()))
                })
                .unwrap()
                .as_singleton()
                .unwrap();
        }

        let gate = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let binder = binder.clone();
                let gate = gate.clone();
                thread::spawn(move || {
                    gate.wait();
                    binder.get::<String>().unwrap()
                })
            })
            .collect();
        let resolved: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(resolved.iter().all(|value| Arc::ptr_eq(value, &resolved[0])));
        let snapshot = metrics.lock().unwrap().snapshot(Default::default());
        assert_eq!(snapshot.singletons_constructed, 1);
    }

    #[test]
    fn failed_singleton_build_can_be_retried() {
        let binder = InjectionBinder::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        {
            let attempts = attempts.clone();
            binder
                .bind::<String>()
                .to_factory(move |_| {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(InjectionError::construction::<String>("warming up"))
                    } else {
                        Ok(Arc::new("ready".to_string()))
                    }
                })
                .unwrap()
                .as_singleton()
                .unwrap();
        }

        assert!(binder.get::<String>().is_err());
        assert_eq!(binder.get::<String>().unwrap().as_str(), "ready");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_singleton_named_only_touches_that_name() {
        let binder = InjectionBinder::new();
        let counter = Arc::new(Counter::default());
        for name in ["left", "right"] {
            let counter = counter.clone();
            binder
                .bind::<usize>()
                .named(name)
                .to_factory(move |_| Ok(Arc::new(counter.next())))
                .unwrap()
                .as_singleton()
                .unwrap();
        }

        let left = binder.get_named::<usize>("left").unwrap();
        let right = binder.get_named::<usize>("right").unwrap();
        assert!(binder.reset_singleton_named::<usize>("left").unwrap());
        assert!(binder.reset_singleton::<usize>().is_err());

        assert!(!Arc::ptr_eq(&left, &binder.get_named::<usize>("left").unwrap()));
        assert!(Arc::ptr_eq(&right, &binder.get_named::<usize>("right").unwrap()));
        assert_eq!(counter.total(), 3);
    }

    #[test]
    fn as_singleton_reports_a_vanished_binding() {
        let binder = InjectionBinder::new();
        let handle = binder.bind::<usize>().to_factory(|_| Ok(Arc::new(1))).unwrap();
        binder.unbind::<usize>().unwrap();

        let err = handle.as_singleton().err().unwrap();
        assert!(matches!(err, InjectionError::UnboundAbstraction { .. }));
    }
}
