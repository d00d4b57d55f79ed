//! View-to-mediator pairing driven by host lifecycle signals.

mod core;
mod host;
mod view;

pub use self::core::{MediationBinder, MediationBindingBuilder, Mediator};
pub use self::host::{Lifeline, LifecycleHost, ObserverId, ViewHost, ViewLifecycle};
pub use self::view::{AsAny, View, ViewHandle, ViewId, ViewInterfaces};
