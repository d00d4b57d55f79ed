use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::InjectResult;
use crate::injection::Injector;

/// Upcasting helpers implemented for every `Send + Sync` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A view component owned by the host. The mediation binder pairs live views
/// with mediators by concrete type or by one of the exposed interfaces.
pub trait View: AsAny {
    fn view_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Abstractions this view can be mediated as, in precedence order.
    fn interfaces(self: Arc<Self>, _interfaces: &mut ViewInterfaces) {}

    /// Called once when the view activates, before any mediator is built.
    fn on_inject(&self, _injector: &mut Injector<'_>) -> InjectResult<()> {
        Ok(())
    }
}

/// Identity of a live view instance, derived from its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(usize);

impl ViewId {
    pub fn of(view: &Arc<dyn View>) -> Self {
        Self(Arc::as_ptr(view) as *const () as usize)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{:x}", self.0)
    }
}

struct ExposedInterface {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Trait objects a view exposes, each stored as a type-erased `Arc<I>`.
#[derive(Default)]
pub struct ViewInterfaces {
    exposed: Vec<ExposedInterface>,
}

impl ViewInterfaces {
    pub fn expose<I>(&mut self, view: Arc<I>) -> &mut Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<I>();
        if !self.exposed.iter().any(|entry| entry.type_id == type_id) {
            self.exposed.push(ExposedInterface {
                type_id,
                type_name: std::any::type_name::<I>(),
                value: Box::new(view),
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.exposed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposed.is_empty()
    }

    fn get<I>(&self) -> Option<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<I>();
        self.exposed
            .iter()
            .find(|entry| entry.type_id == type_id)
            .and_then(|entry| entry.value.downcast_ref::<Arc<I>>())
            .cloned()
    }

    fn type_ids(&self) -> impl Iterator<Item = (TypeId, &'static str)> + '_ {
        self.exposed
            .iter()
            .map(|entry| (entry.type_id, entry.type_name))
    }
}

/// A live view plus everything needed to match and inject it.
#[derive(Clone)]
pub struct ViewHandle {
    id: ViewId,
    name: String,
    concrete: TypeId,
    view: Arc<dyn View>,
    interfaces: Arc<ViewInterfaces>,
}

impl ViewHandle {
    pub fn new(view: Arc<dyn View>) -> Self {
        let id = ViewId::of(&view);
        let concrete = (*view).as_any().type_id();
        let name = view.view_name().to_string();
        let mut interfaces = ViewInterfaces::default();
        Arc::clone(&view).interfaces(&mut interfaces);
        Self {
            id,
            name,
            concrete,
            view,
            interfaces: Arc::new(interfaces),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view(&self) -> &Arc<dyn View> {
        &self.view
    }

    pub fn concrete_type(&self) -> TypeId {
        self.concrete
    }

    pub fn concrete<V>(&self) -> Option<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        Arc::clone(&self.view).into_any().downcast::<V>().ok()
    }

    pub fn interface<I>(&self) -> Option<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.interfaces.get::<I>()
    }

    /// Keys this view can match, concrete type first.
    pub(crate) fn match_keys(&self) -> Vec<(TypeId, &'static str)> {
        let mut keys = vec![(self.concrete, "concrete")];
        keys.extend(self.interfaces.type_ids());
        keys
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interfaces", &self.interfaces.len())
            .finish()
    }
}
