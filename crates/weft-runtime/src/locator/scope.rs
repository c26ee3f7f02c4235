#![forbid(unsafe_code)]

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::global::GlobalRegistry;
use super::resolver::Resolver;
use super::{Owned, TypeRegistry, duplicate};
use crate::error::{Error, Result};
use crate::reactive::Disposable;

/// Order in which a scope disposes the instances it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisposalOrder {
    /// Last created, first disposed.
    #[default]
    ReverseCreation,
    Creation,
}

/// Per-scope settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScopeConfig {
    pub disposal_order: DisposalOrder,
    /// Name used in logs and error messages.
    pub label: Option<String>,
}

impl ScopeConfig {
    #[must_use]
    pub fn with_disposal_order(mut self, order: DisposalOrder) -> Self {
        self.disposal_order = order;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

pub(crate) struct ScopeInner {
    entries: RefCell<TypeRegistry>,
    parent: Option<Weak<ScopeInner>>,
    config: ScopeConfig,
    disposed: Cell<bool>,
}

impl ScopeInner {
    fn name(&self) -> String {
        match &self.config.label {
            Some(label) => format!("scope \"{label}\""),
            None => "scope".to_string(),
        }
    }

    fn dispose_owned(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let mut owned: Vec<Owned> = self.entries.borrow_mut().drain_owned();
        if self.config.disposal_order == DisposalOrder::ReverseCreation {
            owned.reverse();
        }
        debug!(
            scope = %self.name(),
            owned = owned.len(),
            order = ?self.config.disposal_order,
            "disposing scope"
        );
        for Owned {
            type_name,
            resource,
        } in owned
        {
            debug!(type_name, "disposing scoped instance");
            resource.dispose();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose_owned();
    }
}

/// A node in the scope tree.
///
/// Cloning shares the same scope. The scope's owned instances are disposed by
/// [`dispose`](ScopeRegistry::dispose) or when the last handle is dropped.
/// Children hold their parent weakly: a child that outlives its parent
/// resolves straight through to the global registry.
#[derive(Clone)]
pub struct ScopeRegistry {
    inner: Rc<ScopeInner>,
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::root()
    }
}

impl ScopeRegistry {
    /// A scope with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self::with_config(ScopeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ScopeConfig) -> Self {
        Self::build(None, config)
    }

    fn build(parent: Option<Weak<ScopeInner>>, config: ScopeConfig) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                entries: RefCell::new(TypeRegistry::default()),
                parent,
                config,
                disposed: Cell::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Self {
        Self { inner }
    }

    /// A nested scope with default settings.
    #[must_use]
    pub fn child(&self) -> Self {
        self.child_with_config(ScopeConfig::default())
    }

    #[must_use]
    pub fn child_with_config(&self, config: ScopeConfig) -> Self {
        Self::build(Some(Rc::downgrade(&self.inner)), config)
    }

    /// The parent scope, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeRegistry> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Self::from_inner)
    }

    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.inner.config
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.get() {
            return Err(Error::use_after_dispose(self.inner.name()));
        }
        Ok(())
    }

    /// Construct an instance of `T` owned by this scope.
    ///
    /// The constructor receives a [`Resolver`] for its dependencies. Fails
    /// with `DuplicateRegistration` (before running the constructor) if this
    /// scope already holds a `T`.
    pub fn create<T: Any + Disposable>(
        &self,
        construct: impl FnOnce(&Resolver) -> T,
    ) -> Result<Rc<T>> {
        self.ensure_live()?;
        let name = self.inner.name();
        if self.inner.entries.borrow().contains::<T>() {
            return Err(duplicate::<T>(&name));
        }

        let resolver = Resolver::open(&self.inner);
        let value = construct(&resolver);
        resolver.close();

        let value = Rc::new(value);
        let inserted = self
            .inner
            .entries
            .borrow_mut()
            .insert_owned(Rc::clone(&value), &name);
        if let Err(err) = inserted {
            // The constructor registered a `T` itself.
            value.dispose();
            return Err(err);
        }
        debug!(scope = %name, type_name = std::any::type_name::<T>(), "scoped instance created");
        Ok(value)
    }

    /// Store a reference to an instance this scope does not own.
    pub fn provide<T: Any>(&self, value: Rc<T>) -> Result<()> {
        self.ensure_live()?;
        let name = self.inner.name();
        self.inner.entries.borrow_mut().insert_shared(value, &name)
    }

    /// Remove `T` from this scope, disposing it if owned. Returns whether it
    /// was present.
    pub fn remove<T: Any>(&self) -> Result<bool> {
        self.ensure_live()?;
        let removed = self.inner.entries.borrow_mut().remove::<T>();
        Ok(match removed {
            Some(owned) => {
                if let Some(owned) = owned {
                    owned.resource.dispose();
                }
                true
            }
            None => false,
        })
    }

    /// Whether this scope itself (not its ancestors) holds a `T`.
    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.inner.entries.borrow().contains::<T>()
    }

    /// Resolve `T`: this scope, then ancestors outward, then the global
    /// registry.
    pub fn resolve<T: Any>(&self) -> Result<Rc<T>> {
        self.ensure_live()?;
        let mut searched = 0;
        let mut cursor = Some(Rc::clone(&self.inner));
        while let Some(scope) = cursor {
            if scope.disposed.get() {
                break;
            }
            searched += 1;
            if let Some(found) = scope.entries.borrow().get::<T>() {
                return Ok(found);
            }
            cursor = scope.parent.as_ref().and_then(Weak::upgrade);
        }
        GlobalRegistry::get::<T>().ok_or(Error::ResolutionNotFound {
            type_name: std::any::type_name::<T>(),
            searched,
        })
    }

    /// Number of entries held directly by this scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles point at the same scope.
    #[must_use]
    pub fn same_scope(&self, other: &ScopeRegistry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Disposable for ScopeRegistry {
    /// Dispose every owned instance, in [`ScopeConfig::disposal_order`].
    /// Provided, ancestor, and global instances are left alone.
    fn dispose(&self) {
        self.inner.dispose_owned();
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeRegistry")
            .field("name", &self.inner.name())
            .field("entries", &self.len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
