use std::any::Any;
use std::sync::Arc;

use crate::dispatcher::Event;
use crate::error::{InjectResult, InjectionError};
use crate::logging::{LogLevel, json_str, targets};
use crate::mediation::{Lifeline, ViewHandle};

use super::core::{BindingKey, Claim, Erased, InjectionBinder, Provider, SingletonCell};

/// A type the binder knows how to build. Dependencies are pulled from the
/// injector, which also exposes the triggering event or view when there is one.
pub trait Injectable: Sized {
    fn construct(injector: &mut Injector<'_>) -> InjectResult<Self>;
}

/// Declares that an `Arc<Self>` can stand in for an `Arc<A>`.
///
/// Every sized type provides itself. Implement it (or use [`provides!`]) for
/// each trait object a concrete type should be resolvable as.
///
/// [`provides!`]: crate::provides
pub trait Provide<A: ?Sized> {
    fn provide(self: Arc<Self>) -> Arc<A>;
}

impl<T: Send + Sync + 'static> Provide<T> for T {
    fn provide(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Implement [`Provide`] for one or more trait-object abstractions.
///
/// ```ignore
/// provides!(ExampleModel => dyn Model);
/// ```
#[macro_export]
macro_rules! provides {
    ($concrete:ty => $($abstraction:ty),+ $(,)?) => {
        $(
            impl $crate::injection::Provide<$abstraction> for $concrete {
                fn provide(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$abstraction> {
                    self
                }
            }
        )+
    };
}

/// Resolution handle. Tracks the chain of bindings being resolved so cycles
/// surface as `CircularDependency` instead of recursing forever.
pub struct Injector<'a> {
    binder: &'a InjectionBinder,
    chain: Vec<BindingKey>,
    event: Option<&'a Event>,
    view: Option<&'a ViewHandle>,
    lifeline: Option<&'a Lifeline>,
}

impl<'a> Injector<'a> {
    pub(crate) fn new(binder: &'a InjectionBinder) -> Self {
        Self {
            binder,
            chain: Vec::new(),
            event: None,
            view: None,
            lifeline: None,
        }
    }

    pub(crate) fn for_event(binder: &'a InjectionBinder, event: &'a Event) -> Self {
        Self {
            event: Some(event),
            ..Self::new(binder)
        }
    }

    pub(crate) fn for_view(
        binder: &'a InjectionBinder,
        view: &'a ViewHandle,
        lifeline: Option<&'a Lifeline>,
    ) -> Self {
        Self {
            view: Some(view),
            lifeline,
            ..Self::new(binder)
        }
    }

    pub fn binder(&self) -> &'a InjectionBinder {
        self.binder
    }

    pub fn get<A>(&mut self) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<A>(BindingKey::of::<A>())
    }

    pub fn get_named<A>(&mut self, name: &str) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<A>(BindingKey::named::<A>(name))
    }

    /// Resolve an optional dependency: unbound yields `None`, every other
    /// failure still propagates.
    pub fn try_get<A>(&mut self) -> InjectResult<Option<Arc<A>>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        match self.get::<A>() {
            Ok(value) => Ok(Some(value)),
            Err(InjectionError::UnboundAbstraction { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Event currently being handled, when resolving for a command.
    pub fn event(&self) -> Option<&'a Event> {
        self.event
    }

    /// Typed payload of the current event.
    pub fn payload<T: Any>(&self) -> Option<&'a T> {
        self.event.and_then(|event| event.payload::<T>())
    }

    /// The view whose activation triggered this resolution, as its concrete type.
    pub fn view<V>(&self) -> InjectResult<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        self.view
            .and_then(|view| view.concrete::<V>())
            .ok_or(InjectionError::MissingView {
                expected: std::any::type_name::<V>(),
            })
    }

    /// The triggering view as one of the abstractions it exposes.
    pub fn view_as<I>(&self) -> InjectResult<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.view
            .and_then(|view| view.interface::<I>())
            .ok_or(InjectionError::MissingView {
                expected: std::any::type_name::<I>(),
            })
    }

    pub fn view_handle(&self) -> Option<&'a ViewHandle> {
        self.view
    }

    /// Liveness token of the mediator being constructed.
    pub fn lifeline(&self) -> Option<Lifeline> {
        self.lifeline.cloned()
    }

    fn resolve<A>(&mut self, key: BindingKey) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        if self.chain.contains(&key) {
            return Err(self.circular(&key));
        }

        let entry = self.binder.entry(&key)?;
        self.chain.push(key);
        let result = self.provide::<A>(&entry.key, &entry.provider);
        self.chain.pop();
        result
    }

    fn circular(&self, key: &BindingKey) -> InjectionError {
        let mut chain: Vec<String> = self.chain.iter().map(ToString::to_string).collect();
        chain.push(key.to_string());
        InjectionError::CircularDependency {
            chain: chain.join(" -> "),
        }
    }

    fn provide<A>(&mut self, key: &BindingKey, provider: &Provider) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        match provider {
            Provider::Factory(factory) => {
                let erased = factory(self)?;
                downcast_owned::<A>(key, erased)
            }
            Provider::Singleton { factory, cell } => {
                match cell.claim::<A>(key)? {
                    Claim::Ready(existing) => return Ok(existing),
                    Claim::Reentered => return Err(self.circular(key)),
                    Claim::Build => {}
                }
                let pending = PendingSingleton { cell, settled: false };
                let created = factory(self)?;
                let instance = downcast_shared::<A>(key, &created)?;
                pending.fill(created);

                let diagnostics = self.binder.diagnostics();
                diagnostics.record(|metrics| metrics.record_singleton());
                diagnostics.log(
                    LogLevel::Debug,
                    targets::INJECTION,
                    "singleton_constructed",
                    [json_str("key", key.to_string())],
                );
                Ok(instance)
            }
            Provider::Value(value) => downcast_shared::<A>(key, value),
        }
    }
}

/// Returns the cell to empty and wakes waiters unless construction completed.
struct PendingSingleton<'c> {
    cell: &'c SingletonCell,
    settled: bool,
}

impl PendingSingleton<'_> {
    fn fill(mut self, created: Erased) {
        self.settled = true;
        self.cell.settle(Some(created));
    }
}

impl Drop for PendingSingleton<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cell.settle(None);
        }
    }
}

fn downcast_owned<A>(key: &BindingKey, erased: Erased) -> InjectResult<Arc<A>>
where
    A: ?Sized + Send + Sync + 'static,
{
    erased
        .downcast::<Arc<A>>()
        .map(|boxed| *boxed)
        .map_err(|_| InjectionError::TypeMismatch {
            abstraction: key.type_name(),
        })
}

fn downcast_shared<A>(key: &BindingKey, erased: &Erased) -> InjectResult<Arc<A>>
where
    A: ?Sized + Send + Sync + 'static,
{
    erased
        .downcast_ref::<Arc<A>>()
        .cloned()
        .ok_or(InjectionError::TypeMismatch {
            abstraction: key.type_name(),
        })
}
