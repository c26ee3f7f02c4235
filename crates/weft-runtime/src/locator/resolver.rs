#![forbid(unsafe_code)]

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::scope::{ScopeInner, ScopeRegistry};
use crate::error::{Error, Result};

/// Construction-time access to a scope.
///
/// Handed to the constructor passed to [`ScopeRegistry::create`]. Resolving
/// after the constructor returned fails with
/// [`Error::ResolverMisuseAfterConstruction`], even through clones.
#[derive(Clone)]
pub struct Resolver {
    scope: Weak<ScopeInner>,
    open: Rc<Cell<bool>>,
}

impl Resolver {
    pub(crate) fn open(scope: &Rc<ScopeInner>) -> Self {
        Self {
            scope: Rc::downgrade(scope),
            open: Rc::new(Cell::new(true)),
        }
    }

    pub(crate) fn close(&self) {
        self.open.set(false);
    }

    /// Resolve `T` from the scope under construction (nearest-wins).
    pub fn resolve<T: Any>(&self) -> Result<Rc<T>> {
        let type_name = std::any::type_name::<T>();
        if !self.open.get() {
            return Err(Error::ResolverMisuseAfterConstruction { type_name });
        }
        let inner = self
            .scope
            .upgrade()
            .ok_or_else(|| Error::use_after_dispose("scope"))?;
        ScopeRegistry::from_inner(inner).resolve::<T>()
    }

    /// Whether the owning constructor is still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("open", &self.open.get())
            .finish_non_exhaustive()
    }
}
