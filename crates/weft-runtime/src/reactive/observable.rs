#![forbid(unsafe_code)]

//! Observable properties.
//!
//! [`Observable<T>`] is a shared, version-tracked value with change
//! notification. Reads report the property's node to the active tracking
//! session; writes notify listeners when the property's [`Equality`] policy
//! says the value changed.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per write the equality policy counts as
//!    a change.
//! 2. Listeners are notified in registration order, after the new value is
//!    stored and every borrow is released (listeners may read the property).
//! 3. A write the policy counts as "equal" still stores the new value but bumps
//!    nothing and notifies no one.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::node::{Disposable, NodeHandle, NodeKind, ObservableNode, Subscription};
use crate::error::Result;

/// Decides whether a write is a change.
///
/// `is_equal(old, new) == true` suppresses notification.
pub struct Equality<T> {
    is_equal: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            is_equal: Rc::clone(&self.is_equal),
        }
    }
}

impl<T: PartialEq + 'static> Equality<T> {
    /// Compare with `PartialEq` (the default).
    #[must_use]
    pub fn by_value() -> Self {
        Self {
            is_equal: Rc::new(|a: &T, b: &T| a == b),
        }
    }
}

impl<T: 'static> Equality<T> {
    /// Every write is a change.
    #[must_use]
    pub fn never() -> Self {
        Self {
            is_equal: Rc::new(|_: &T, _: &T| false),
        }
    }

    /// Caller-supplied comparison.
    #[must_use]
    pub fn custom(is_equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            is_equal: Rc::new(is_equal),
        }
    }

    fn equal(&self, old: &T, new: &T) -> bool {
        (self.is_equal)(old, new)
    }
}

impl<U: 'static> Equality<Rc<U>> {
    /// Pointer identity for shared values.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            is_equal: Rc::new(|a: &Rc<U>, b: &Rc<U>| Rc::ptr_eq(a, b)),
        }
    }
}

struct ObservableInner<T> {
    node: NodeHandle,
    value: RefCell<T>,
    version: Cell<u64>,
    equality: Equality<T>,
}

/// A shared, observable value.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Equality::by_value())
    }

    #[must_use]
    pub fn labeled(label: impl Into<Cow<'static, str>>, value: T) -> Self {
        Self::build(Some(label.into()), value, Equality::by_value())
    }
}

impl<T: 'static> Observable<T> {
    #[must_use]
    pub fn with_equality(value: T, equality: Equality<T>) -> Self {
        Self::build(None, value, equality)
    }

    pub(crate) fn build(
        label: Option<Cow<'static, str>>,
        value: T,
        equality: Equality<T>,
    ) -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                node: NodeHandle::new(NodeKind::Property, label),
                value: RefCell::new(value),
                version: Cell::new(0),
                equality,
            }),
        }
    }

    /// Borrow the value, reporting the read.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.node.ensure_live()?;
        self.inner.node.track();
        Ok(f(&self.inner.value.borrow()))
    }

    /// Borrow the value, reporting the read.
    ///
    /// # Panics
    ///
    /// If the property was disposed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(r) => r,
            Err(err) => panic!("{err}"),
        }
    }

    /// Replace the value.
    ///
    /// Returns `Ok(true)` if listeners were notified.
    pub fn try_set(&self, value: T) -> Result<bool> {
        self.inner.node.ensure_live()?;
        let changed = {
            let mut slot = self.inner.value.borrow_mut();
            let changed = !self.inner.equality.equal(&slot, &value);
            *slot = value;
            changed
        };
        if changed {
            self.inner.version.set(self.inner.version.get() + 1);
            self.inner.node.notify();
        }
        Ok(changed)
    }

    /// Replace the value.
    ///
    /// # Panics
    ///
    /// If the property was disposed.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            panic!("{err}");
        }
    }

    /// Version counter; bumps once per changing write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.node.listener_count()
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Current value, reporting the read.
    pub fn try_get(&self) -> Result<T> {
        self.try_with(T::clone)
    }

    /// Current value, reporting the read.
    ///
    /// # Panics
    ///
    /// If the property was disposed.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Current value without reporting the read.
    pub fn try_get_untracked(&self) -> Result<T> {
        self.inner.node.ensure_live()?;
        Ok(self.inner.value.borrow().clone())
    }

    /// Current value without reporting the read.
    ///
    /// # Panics
    ///
    /// If the property was disposed.
    #[must_use]
    pub fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Modify a copy of the value in place and write it back.
    ///
    /// # Panics
    ///
    /// If the property was disposed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }

    /// Typed listener receiving the new value.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Result<Subscription> {
        let weak = Rc::downgrade(&self.inner);
        self.inner.node.add_listener(move || {
            if let Some(inner) = weak.upgrade() {
                let value = inner.value.borrow().clone();
                callback(&value);
            }
        })
    }
}

impl<T> ObservableNode for Observable<T> {
    fn node(&self) -> &NodeHandle {
        &self.inner.node
    }
}

impl<T> Disposable for Observable<T> {
    fn dispose(&self) {
        self.inner.node.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Observable");
        s.field("node", &self.inner.node.describe());
        match self.inner.value.try_borrow() {
            Ok(v) => s.field("value", &*v),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.field("version", &self.inner.version.get()).finish()
    }
}
