use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::diagnostics::Diagnostics;
use crate::error::{InjectResult, InjectionError};
use crate::logging::{LogLevel, json_kv, json_str, targets};

use super::injector::{Injectable, Injector, Provide};

/// Type-erased instance: always a boxed `Arc<A>` for the bound abstraction `A`.
pub(crate) type Erased = Box<dyn Any + Send + Sync>;

pub(crate) type ErasedFactory =
    Arc<dyn Fn(&mut Injector<'_>) -> InjectResult<Erased> + Send + Sync>;

/// What happens when a key is bound a second time without `replacing()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingPolicy {
    /// Rebinding fails with `DuplicateBinding`.
    #[default]
    Strict,
    /// Rebinding silently replaces the previous binding.
    Replace,
}

/// Identity of a binding: the abstraction's `TypeId` plus an optional name.
#[derive(Clone)]
pub struct BindingKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<String>,
}

impl BindingKey {
    pub fn of<A: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<A>(),
            type_name: std::any::type_name::<A>(),
            name: None,
        }
    }

    pub fn named<A: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::of::<A>()
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn unbound(&self) -> InjectionError {
        InjectionError::UnboundAbstraction {
            abstraction: self.type_name,
            name: self.name.clone(),
        }
    }
}

impl PartialEq for BindingKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for BindingKey {}

impl Hash for BindingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}", self.type_name, name),
            None => f.write_str(self.type_name),
        }
    }
}

fn erase<F>(factory: F) -> ErasedFactory
where
    F: Fn(&mut Injector<'_>) -> InjectResult<Erased> + Send + Sync + 'static,
{
    Arc::new(factory)
}

pub(crate) enum SingletonSlot {
    Empty,
    Constructing(ThreadId),
    Ready(Erased),
}

/// Outcome of asking a singleton cell for its instance.
pub(crate) enum Claim<A: ?Sized> {
    Ready(Arc<A>),
    /// The caller now owns construction and must settle the cell.
    Build,
    /// The calling thread is already constructing this singleton.
    Reentered,
}

/// Lazily filled singleton storage. Construction runs without the slot lock
/// held; other threads wait on `settled` until the builder finishes.
pub(crate) struct SingletonCell {
    slot: Mutex<SingletonSlot>,
    settled: Condvar,
}

impl SingletonCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(SingletonSlot::Empty),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> InjectResult<MutexGuard<'_, SingletonSlot>> {
        self.slot.lock().map_err(|_| InjectionError::Poisoned)
    }

    pub(crate) fn claim<A>(&self, key: &BindingKey) -> InjectResult<Claim<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        let current = thread::current().id();
        let mut guard = self.lock()?;
        loop {
            let builder = match &*guard {
                SingletonSlot::Ready(existing) => {
                    return existing
                        .downcast_ref::<Arc<A>>()
                        .cloned()
                        .map(Claim::Ready)
                        .ok_or(InjectionError::TypeMismatch {
                            abstraction: key.type_name(),
                        });
                }
                SingletonSlot::Constructing(owner) => Some(*owner),
                SingletonSlot::Empty => None,
            };
            match builder {
                Some(owner) if owner == current => return Ok(Claim::Reentered),
                Some(_) => {
                    guard = self
                        .settled
                        .wait(guard)
                        .map_err(|_| InjectionError::Poisoned)?;
                }
                None => {
                    *guard = SingletonSlot::Constructing(current);
                    return Ok(Claim::Build);
                }
            }
        }
    }

    /// Store the built instance, or return to empty when `created` is `None`.
    pub(crate) fn settle(&self, created: Option<Erased>) {
        let next = match created {
            Some(instance) => SingletonSlot::Ready(instance),
            None => SingletonSlot::Empty,
        };
        match self.slot.lock() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        self.settled.notify_all();
    }

    fn reset(&self) -> InjectResult<bool> {
        let mut guard = self.lock()?;
        if matches!(&*guard, SingletonSlot::Ready(_)) {
            *guard = SingletonSlot::Empty;
            return Ok(true);
        }
        Ok(false)
    }
}

pub(crate) enum Provider {
    Factory(ErasedFactory),
    Singleton {
        factory: ErasedFactory,
        cell: SingletonCell,
    },
    Value(Erased),
}

impl Provider {
    fn kind(&self) -> &'static str {
        match self {
            Provider::Factory(_) => "factory",
            Provider::Singleton { .. } => "singleton",
            Provider::Value(_) => "value",
        }
    }
}

pub(crate) struct BindingEntry {
    pub(crate) key: BindingKey,
    pub(crate) provider: Provider,
}

/// Typed registry mapping abstractions to providers.
///
/// Tables are guarded by `RwLock`s but no lock is held while a factory runs,
/// so factories may resolve further dependencies through the injector they
/// are handed. A singleton is built at most once; a thread that reaches the
/// same singleton again while building it gets `CircularDependency`.
pub struct InjectionBinder {
    entries: RwLock<HashMap<BindingKey, Arc<BindingEntry>>>,
    policy: BindingPolicy,
    diagnostics: Diagnostics,
}

impl Default for InjectionBinder {
    fn default() -> Self {
        Self::with_policy(BindingPolicy::Strict)
    }
}

impl InjectionBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: BindingPolicy) -> Self {
        Self::with_diagnostics(policy, Diagnostics::silent())
    }

    pub fn with_diagnostics(policy: BindingPolicy, diagnostics: Diagnostics) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
            diagnostics,
        }
    }

    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Start a binding for abstraction `A`.
    pub fn bind<A>(&self) -> BindingBuilder<'_, A>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        BindingBuilder {
            binder: self,
            name: None,
            replace: false,
            _abstraction: PhantomData,
        }
    }

    /// Fresh resolution handle with an empty resolution chain.
    pub fn injector(&self) -> Injector<'_> {
        Injector::new(self)
    }

    pub fn get<A>(&self) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        self.injector().get::<A>()
    }

    pub fn get_named<A>(&self, name: &str) -> InjectResult<Arc<A>>
    where
        A: ?Sized + Send + Sync + 'static,
    {
        self.injector().get_named::<A>(name)
    }

    pub fn is_bound<A: ?Sized + 'static>(&self) -> bool {
        self.contains(&BindingKey::of::<A>())
    }

    pub fn is_bound_named<A: ?Sized + 'static>(&self, name: &str) -> bool {
        self.contains(&BindingKey::named::<A>(name))
    }

    pub fn binding_count(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn unbind<A: ?Sized + 'static>(&self) -> InjectResult<bool> {
        self.remove(&BindingKey::of::<A>())
    }

    pub fn unbind_named<A: ?Sized + 'static>(&self, name: &str) -> InjectResult<bool> {
        self.remove(&BindingKey::named::<A>(name))
    }

    /// Drop the cached instance of a singleton binding so the next resolution
    /// constructs a new one. Returns whether an instance was released.
    pub fn reset_singleton<A: ?Sized + 'static>(&self) -> InjectResult<bool> {
        self.reset(&BindingKey::of::<A>())
    }

    pub fn reset_singleton_named<A: ?Sized + 'static>(&self, name: &str) -> InjectResult<bool> {
        self.reset(&BindingKey::named::<A>(name))
    }

    /// Release every cached singleton while keeping the bindings.
    pub fn release_singletons(&self) -> InjectResult<usize> {
        let entries: Vec<_> = {
            let guard = self.entries.read().map_err(|_| InjectionError::Poisoned)?;
            guard.values().cloned().collect()
        };
        let mut released = 0;
        for entry in entries {
            if let Provider::Singleton { cell, .. } = &entry.provider {
                if cell.reset()? {
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Remove every binding, releasing singletons and literal values.
    pub fn clear(&self) -> InjectResult<()> {
        let drained: Vec<_> = {
            let mut guard = self.entries.write().map_err(|_| InjectionError::Poisoned)?;
            guard.drain().map(|(_, entry)| entry).collect()
        };
        self.diagnostics.log(
            LogLevel::Debug,
            targets::INJECTION,
            "bindings_cleared",
            [json_kv("count", json!(drained.len()))],
        );
        // Values are dropped outside the table lock; a value's destructor may
        // reach back into this binder.
        drop(drained);
        Ok(())
    }

    fn reset(&self, key: &BindingKey) -> InjectResult<bool> {
        let entry = self.entry(key)?;
        match &entry.provider {
            Provider::Singleton { cell, .. } => cell.reset(),
            _ => Ok(false),
        }
    }

    fn contains(&self, key: &BindingKey) -> bool {
        self.entries
            .read()
            .map(|guard| guard.contains_key(key))
            .unwrap_or(false)
    }

    fn remove(&self, key: &BindingKey) -> InjectResult<bool> {
        let removed = {
            let mut guard = self.entries.write().map_err(|_| InjectionError::Poisoned)?;
            guard.remove(key)
        };
        if removed.is_some() {
            self.diagnostics.log(
                LogLevel::Debug,
                targets::INJECTION,
                "binding_removed",
                [json_str("key", key.to_string())],
            );
        }
        Ok(removed.is_some())
    }

    pub(crate) fn entry(&self, key: &BindingKey) -> InjectResult<Arc<BindingEntry>> {
        let guard = self.entries.read().map_err(|_| InjectionError::Poisoned)?;
        guard.get(key).cloned().ok_or_else(|| key.unbound())
    }

    fn insert(&self, key: BindingKey, provider: Provider, replace: bool) -> InjectResult<()> {
        let kind = provider.kind();
        let previous = {
            let mut guard = self.entries.write().map_err(|_| InjectionError::Poisoned)?;
            if guard.contains_key(&key) && !replace && self.policy == BindingPolicy::Strict {
                return Err(InjectionError::DuplicateBinding {
                    abstraction: key.type_name,
                    name: key.name.clone(),
                });
            }
            let entry = Arc::new(BindingEntry {
                key: key.clone(),
                provider,
            });
            guard.insert(key.clone(), entry)
        };
        self.diagnostics.log(
            LogLevel::Debug,
            targets::INJECTION,
            if previous.is_some() {
                "binding_replaced"
            } else {
                "binding_added"
            },
            [json_str("key", key.to_string()), json_str("provider", kind)],
        );
        Ok(())
    }

    fn promote_to_singleton(&self, key: &BindingKey) -> InjectResult<()> {
        let mut guard = self.entries.write().map_err(|_| InjectionError::Poisoned)?;
        let entry = guard.get(key).cloned().ok_or_else(|| key.unbound())?;
        if let Provider::Factory(factory) = &entry.provider {
            let promoted = Arc::new(BindingEntry {
                key: key.clone(),
                provider: Provider::Singleton {
                    factory: Arc::clone(factory),
                    cell: SingletonCell::new(),
                },
            });
            guard.insert(key.clone(), promoted);
        }
        Ok(())
    }
}

/// Fluent builder returned by [`InjectionBinder::bind`]. The `to_*` methods
/// are terminal and register the binding.
pub struct BindingBuilder<'b, A: ?Sized> {
    binder: &'b InjectionBinder,
    name: Option<String>,
    replace: bool,
    _abstraction: PhantomData<fn() -> Arc<A>>,
}

impl<'b, A> BindingBuilder<'b, A>
where
    A: ?Sized + Send + Sync + 'static,
{
    /// Disambiguate this binding from other bindings of the same abstraction.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicitly override an existing binding even under a strict policy.
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Bind to a concrete type constructed through [`Injectable`].
    pub fn to_type<C>(self) -> InjectResult<BindingHandle<'b>>
    where
        C: Injectable + Provide<A> + Send + Sync + 'static,
    {
        self.to_factory(|injector| {
            let concrete = C::construct(injector)?;
            Ok(<C as Provide<A>>::provide(Arc::new(concrete)))
        })
    }

    /// Bind to a closure producing a new instance on each resolution.
    pub fn to_factory<F>(self, factory: F) -> InjectResult<BindingHandle<'b>>
    where
        F: Fn(&mut Injector<'_>) -> InjectResult<Arc<A>> + Send + Sync + 'static,
    {
        let erased = erase(move |injector| {
            factory(injector).map(|value| Box::new(value) as Erased)
        });
        self.commit(Provider::Factory(erased))
    }

    /// Bind to a pre-built value shared by every resolution.
    pub fn to_value(self, value: Arc<A>) -> InjectResult<BindingHandle<'b>> {
        self.commit(Provider::Value(Box::new(value)))
    }

    fn commit(self, provider: Provider) -> InjectResult<BindingHandle<'b>> {
        let key = BindingKey {
            name: self.name,
            ..BindingKey::of::<A>()
        };
        self.binder.insert(key.clone(), provider, self.replace)?;
        Ok(BindingHandle {
            binder: self.binder,
            key,
        })
    }
}

/// A registered binding that can still be refined.
pub struct BindingHandle<'b> {
    binder: &'b InjectionBinder,
    key: BindingKey,
}

impl<'b> BindingHandle<'b> {
    /// Construct lazily on first resolution and hand out that one instance
    /// thereafter. Has no effect on value bindings.
    pub fn as_singleton(self) -> InjectResult<Self> {
        self.binder.promote_to_singleton(&self.key)?;
        Ok(self)
    }

    pub fn key(&self) -> &BindingKey {
        &self.key
    }
}
