use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::json;

use crate::diagnostics::{ContextAuditEventBuilder, ContextAuditStage, Diagnostics};
use crate::error::{InjectResult, MediationError, MediationResult};
use crate::injection::{BindingPolicy, Injectable, InjectionBinder, Injector};
use crate::logging::{LogLevel, json_kv, json_str, targets};

use super::host::{Lifeline, ViewLifecycle};
use super::view::{View, ViewHandle, ViewId};

/// Per-view controller created when its view activates and released when the
/// view deactivates. Both hooks run exactly once per association.
pub trait Mediator: Send {
    fn on_register(&mut self) -> MediationResult<()> {
        Ok(())
    }

    fn on_remove(&mut self) -> MediationResult<()> {
        Ok(())
    }
}

type MediatorFactory =
    Arc<dyn Fn(&mut Injector<'_>) -> InjectResult<Box<dyn Mediator>> + Send + Sync>;

fn mediator_factory<F>(factory: F) -> MediatorFactory
where
    F: Fn(&mut Injector<'_>) -> InjectResult<Box<dyn Mediator>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

struct MediationBinding {
    view: &'static str,
    mediator: &'static str,
    abstraction: bool,
    factory: MediatorFactory,
}

struct ActiveMediator {
    binding: TypeId,
    view_name: String,
    mediator_name: &'static str,
    // `None` while the mediator is being constructed and registered.
    mediator: Option<Box<dyn Mediator>>,
    lifeline: Lifeline,
}

/// Pairs live views with mediators.
///
/// A view matches a concrete binding by its own type first, then an
/// abstraction binding by each exposed interface in order. Each live view gets at most one mediator. Mediator
/// hooks run with no table lock held, so they may dispatch events or
/// activate other views.
pub struct MediationBinder {
    injection: Arc<InjectionBinder>,
    bindings: RwLock<HashMap<TypeId, Arc<MediationBinding>>>,
    active: Mutex<HashMap<ViewId, ActiveMediator>>,
    diagnostics: Diagnostics,
}

impl MediationBinder {
    pub fn new(injection: Arc<InjectionBinder>) -> Self {
        let diagnostics = injection.diagnostics().clone();
        Self {
            injection,
            bindings: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            diagnostics,
        }
    }

    /// Start a mediation binding for view type (or view abstraction) `V`.
    pub fn bind<V>(&self) -> MediationBindingBuilder<'_, V>
    where
        V: ?Sized + 'static,
    {
        MediationBindingBuilder {
            binder: self,
            abstraction: false,
            _view: PhantomData,
        }
    }

    pub fn is_bound<V: ?Sized + 'static>(&self) -> bool {
        self.bindings
            .read()
            .map(|guard| guard.contains_key(&TypeId::of::<V>()))
            .unwrap_or(false)
    }

    /// Remove the binding for `V` and release every mediator it created.
    pub fn unbind<V: ?Sized + 'static>(&self) -> MediationResult<bool> {
        let type_id = TypeId::of::<V>();
        let removed = {
            let mut guard = self.bindings.write().map_err(|_| MediationError::Poisoned)?;
            guard.remove(&type_id)
        };
        if removed.is_none() {
            return Ok(false);
        }
        let orphaned: Vec<ViewId> = {
            let guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
            guard
                .iter()
                .filter(|(_, active)| active.binding == type_id)
                .map(|(id, _)| *id)
                .collect()
        };
        let mut first_error = None;
        for id in orphaned {
            if let Err(err) = self.release(id) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    pub fn has_mediator(&self, view: ViewId) -> bool {
        self.active
            .lock()
            .map(|guard| guard.get(&view).is_some_and(|active| active.mediator.is_some()))
            .unwrap_or(false)
    }

    pub fn mediator_count(&self) -> usize {
        self.active
            .lock()
            .map(|guard| guard.values().filter(|active| active.mediator.is_some()).count())
            .unwrap_or(0)
    }

    /// Handle a view activation. Returns `true` when a mediator was created.
    ///
    /// The view's own `on_inject` runs first, whether or not a binding
    /// matches. An already mediated view is left untouched.
    pub fn on_view_activated(&self, view: &Arc<dyn View>) -> MediationResult<bool> {
        let handle = ViewHandle::new(Arc::clone(view));
        let id = handle.id();
        if self.is_tracked(id)? {
            return Ok(false);
        }

        view.on_inject(&mut Injector::for_view(&self.injection, &handle, None))?;

        let Some((binding_type, binding)) = self.find_binding(&handle)? else {
            self.diagnostics.log(
                LogLevel::Trace,
                targets::MEDIATION,
                "view_unmediated",
                [json_str("view", handle.name())],
            );
            return Ok(false);
        };

        let lifeline = Lifeline::new();
        {
            let mut guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
            if guard.contains_key(&id) {
                return Ok(false);
            }
            guard.insert(
                id,
                ActiveMediator {
                    binding: binding_type,
                    view_name: handle.name().to_string(),
                    mediator_name: binding.mediator,
                    mediator: None,
                    lifeline: lifeline.clone(),
                },
            );
        }

        let constructed = (binding.factory)(&mut Injector::for_view(
            &self.injection,
            &handle,
            Some(&lifeline),
        ));
        let mut mediator = match constructed {
            Ok(mediator) => mediator,
            Err(err) => {
                self.forget(id);
                lifeline.cut();
                return Err(err.into());
            }
        };

        let registered = mediator.on_register();

        // The view may have deactivated from inside `on_register`.
        let parked = {
            let mut guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
            match guard.get_mut(&id) {
                Some(active) if active.lifeline.is_alive() => {
                    active.mediator = Some(mediator);
                    None
                }
                _ => Some(mediator),
            }
        };

        self.diagnostics.record(|metrics| metrics.record_mediator_registered());
        self.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::MediatorRegistered)
                .detail("view", json!(handle.name()))
                .detail("mediator", json!(binding.mediator))
                .finish(),
        );
        self.diagnostics.log(
            LogLevel::Debug,
            targets::MEDIATION,
            "mediator_registered",
            [
                json_str("view", handle.name()),
                json_str("mediator", binding.mediator),
                json_kv("abstraction", json!(binding.abstraction)),
                json_str("matched", binding.view),
            ],
        );

        if let Some(mut orphan) = parked {
            let removed = orphan.on_remove();
            self.note_removed(handle.name(), binding.mediator);
            removed.map_err(|err| hook_error(binding.mediator, "on_remove", err))?;
        }

        registered.map_err(|err| hook_error(binding.mediator, "on_register", err))?;
        Ok(true)
    }

    /// Handle a view deactivation. Returns `true` when a mediator was released.
    ///
    /// The association is dropped before `on_remove` runs, so a failing hook
    /// never leaks the mediator.
    pub fn on_view_deactivated(&self, view: &Arc<dyn View>) -> MediationResult<bool> {
        self.release(ViewId::of(view))
    }

    /// Release every live mediator. Returns how many were released.
    pub fn remove_all(&self) -> MediationResult<usize> {
        let ids: Vec<ViewId> = {
            let guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
            guard.keys().copied().collect()
        };
        let mut released = 0;
        let mut first_error = None;
        for id in ids {
            match self.release(id) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(err) => {
                    released += 1;
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(released),
        }
    }

    /// Release every mediator and forget every binding.
    pub fn clear(&self) -> MediationResult<usize> {
        let released = self.remove_all();
        if let Ok(mut guard) = self.bindings.write() {
            guard.clear();
        }
        released
    }

    fn register(&self, type_id: TypeId, binding: MediationBinding) -> MediationResult<()> {
        let view = binding.view;
        let mediator = binding.mediator;
        {
            let mut guard = self.bindings.write().map_err(|_| MediationError::Poisoned)?;
            if guard.contains_key(&type_id) && self.injection.policy() == BindingPolicy::Strict {
                return Err(MediationError::DuplicateBinding { view });
            }
            guard.insert(type_id, Arc::new(binding));
        }
        self.diagnostics.log(
            LogLevel::Debug,
            targets::MEDIATION,
            "mediation_bound",
            [json_str("view", view), json_str("mediator", mediator)],
        );
        Ok(())
    }

    fn release(&self, id: ViewId) -> MediationResult<bool> {
        let removed = {
            let mut guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
            guard.remove(&id)
        };
        let Some(active) = removed else {
            return Ok(false);
        };
        active.lifeline.cut();
        // Still under construction: the activating call finishes the teardown.
        let Some(mut mediator) = active.mediator else {
            return Ok(false);
        };
        let result = mediator.on_remove();
        drop(mediator);
        self.note_removed(&active.view_name, active.mediator_name);
        result
            .map(|()| true)
            .map_err(|err| hook_error(active.mediator_name, "on_remove", err))
    }

    fn note_removed(&self, view: &str, mediator: &'static str) {
        self.diagnostics.record(|metrics| metrics.record_mediator_removed());
        self.diagnostics.audit(
            ContextAuditEventBuilder::new(ContextAuditStage::MediatorRemoved)
                .detail("view", json!(view))
                .detail("mediator", json!(mediator))
                .finish(),
        );
        self.diagnostics.log(
            LogLevel::Debug,
            targets::MEDIATION,
            "mediator_removed",
            [json_str("view", view), json_str("mediator", mediator)],
        );
    }

    fn is_tracked(&self, id: ViewId) -> MediationResult<bool> {
        let guard = self.active.lock().map_err(|_| MediationError::Poisoned)?;
        Ok(guard.contains_key(&id))
    }

    fn forget(&self, id: ViewId) {
        if let Ok(mut guard) = self.active.lock() {
            guard.remove(&id);
        }
    }

    fn find_binding(
        &self,
        handle: &ViewHandle,
    ) -> MediationResult<Option<(TypeId, Arc<MediationBinding>)>> {
        let guard = self.bindings.read().map_err(|_| MediationError::Poisoned)?;
        // The first key is the concrete type; the rest are exposed interfaces.
        Ok(handle
            .match_keys()
            .into_iter()
            .enumerate()
            .find_map(|(index, (type_id, _))| {
                guard
                    .get(&type_id)
                    .filter(|binding| binding.abstraction == (index > 0))
                    .map(|binding| (type_id, Arc::clone(binding)))
            }))
    }
}

impl ViewLifecycle for MediationBinder {
    fn view_activated(&self, view: &Arc<dyn View>) {
        if let Err(err) = self.on_view_activated(view) {
            self.diagnostics.log(
                LogLevel::Error,
                targets::MEDIATION,
                "view_activation_failed",
                [
                    json_str("view", view.view_name()),
                    json_str("error", err.to_string()),
                ],
            );
        }
    }

    fn view_deactivated(&self, view: &Arc<dyn View>) {
        if let Err(err) = self.on_view_deactivated(view) {
            self.diagnostics.log(
                LogLevel::Error,
                targets::MEDIATION,
                "view_deactivation_failed",
                [
                    json_str("view", view.view_name()),
                    json_str("error", err.to_string()),
                ],
            );
        }
    }
}

fn hook_error(mediator: &'static str, hook: &'static str, source: MediationError) -> MediationError {
    MediationError::Hook {
        mediator,
        hook,
        source: Box::new(source),
    }
}

/// Builder returned by [`MediationBinder::bind`].
pub struct MediationBindingBuilder<'b, V: ?Sized> {
    binder: &'b MediationBinder,
    abstraction: bool,
    _view: PhantomData<fn() -> Box<V>>,
}

impl<'b, V> MediationBindingBuilder<'b, V>
where
    V: ?Sized + 'static,
{
    /// Match views exposing `V` as an interface rather than views of
    /// concrete type `V`. Without it only the concrete type matches.
    pub fn to_abstraction(mut self) -> Self {
        self.abstraction = true;
        self
    }

    /// Pair matching views with mediator `M`, built through the injection
    /// binder each time a view activates.
    pub fn to<M>(self) -> MediationResult<()>
    where
        M: Mediator + Injectable + 'static,
    {
        let factory = mediator_factory(|injector| {
            M::construct(injector).map(|mediator| Box::new(mediator) as Box<dyn Mediator>)
        });
        self.binder.register(
            TypeId::of::<V>(),
            MediationBinding {
                view: std::any::type_name::<V>(),
                mediator: std::any::type_name::<M>(),
                abstraction: self.abstraction,
                factory,
            },
        )
    }
}
