#![forbid(unsafe_code)]

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use super::{Owned, TypeRegistry};
use crate::error::{Error, Result};
use crate::reactive::Disposable;

const REGISTRY_NAME: &str = "the global registry";

thread_local! {
    static GLOBAL: RefCell<TypeRegistry> = RefCell::new(TypeRegistry::default());
}

/// Application-wide registry for the current UI thread.
///
/// The last resort of every [`ScopeRegistry::resolve`](super::ScopeRegistry::resolve).
pub struct GlobalRegistry;

impl GlobalRegistry {
    /// Register a shared instance. The registry never disposes it.
    pub fn register<T: Any>(value: Rc<T>) -> Result<()> {
        GLOBAL.with(|g| g.borrow_mut().insert_shared(value, REGISTRY_NAME))?;
        debug!(type_name = std::any::type_name::<T>(), "global instance registered");
        Ok(())
    }

    /// Register an instance owned by the registry; disposed by
    /// [`unregister`](Self::unregister) or [`clear`](Self::clear).
    pub fn register_owned<T: Any + Disposable>(value: T) -> Result<Rc<T>> {
        let value = Rc::new(value);
        GLOBAL.with(|g| g.borrow_mut().insert_owned(Rc::clone(&value), REGISTRY_NAME))?;
        debug!(type_name = std::any::type_name::<T>(), "global instance registered (owned)");
        Ok(value)
    }

    /// Remove `T`, disposing it if owned. Returns whether it was present.
    pub fn unregister<T: Any>() -> bool {
        let removed = GLOBAL.with(|g| g.borrow_mut().remove::<T>());
        match removed {
            Some(owned) => {
                if let Some(owned) = owned {
                    owned.resource.dispose();
                }
                true
            }
            None => false,
        }
    }

    pub fn resolve<T: Any>() -> Result<Rc<T>> {
        Self::get::<T>().ok_or(Error::ResolutionNotFound {
            type_name: std::any::type_name::<T>(),
            searched: 0,
        })
    }

    pub(crate) fn get<T: Any>() -> Option<Rc<T>> {
        GLOBAL.with(|g| g.borrow().get::<T>())
    }

    #[must_use]
    pub fn contains<T: Any>() -> bool {
        GLOBAL.with(|g| g.borrow().contains::<T>())
    }

    /// Remove everything, disposing owned instances in reverse registration
    /// order.
    pub fn clear() {
        let owned: Vec<Owned> = GLOBAL.with(|g| g.borrow_mut().drain_owned());
        for Owned {
            type_name,
            resource,
        } in owned.into_iter().rev()
        {
            debug!(type_name, "disposing global instance");
            resource.dispose();
        }
    }
}
