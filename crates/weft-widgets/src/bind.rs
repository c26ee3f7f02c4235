#![forbid(unsafe_code)]

//! Property binding.
//!
//! [`Bind::mount`] resolves a view-model from the mount point's scope, then on
//! every render applies a selector to it and hands the builder a
//! [`BoundValue`]. The selector decides the binding mode explicitly:
//!
//! - [`Selection::TwoWay`] hands back the property itself; the builder gets
//!   its current value and a setter that writes to it.
//! - [`Selection::OneWay`] hands back a plain value (usually read from one or
//!   more properties); the builder gets no setter.
//!
//! Either way the selector runs inside the render, so every property it reads
//! is tracked.
//!
//! # Invariants
//!
//! 1. Resolution happens once, at mount. A missing view-model is an error
//!    from `mount`, never a panic inside a render.
//! 2. The setter writes through the property's equality policy: setting an
//!    equal value does not re-render.

use std::fmt;
use std::rc::Rc;

use weft_runtime::{Observable, ObservableNode as _, Result};

use crate::view::{MountPoint, RenderCx, TrackedView};

/// What a selector picked.
pub enum Selection<T> {
    /// The property itself; the bound value is writable.
    TwoWay(Observable<T>),
    /// A snapshot; the bound value is read-only.
    OneWay(T),
}

impl<T: Clone + 'static> Selection<T> {
    /// Resolve to a bound value. A two-way selection reads its property here.
    pub fn into_bound(self) -> BoundValue<T> {
        match self {
            Self::TwoWay(property) => {
                let value = property.get();
                let setter: Setter<T> = Rc::new(move |v| property.set(v));
                BoundValue {
                    value,
                    setter: Some(setter),
                }
            }
            Self::OneWay(value) => BoundValue {
                value,
                setter: None,
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Selection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoWay(property) => f.debug_tuple("TwoWay").field(&property.id()).finish(),
            Self::OneWay(value) => f.debug_tuple("OneWay").field(value).finish(),
        }
    }
}

/// Writes a new value back to a two-way bound property.
pub type Setter<T> = Rc<dyn Fn(T)>;

/// A value handed to a bound builder.
#[derive(Clone)]
pub struct BoundValue<T> {
    value: T,
    setter: Option<Setter<T>>,
}

impl<T> BoundValue<T> {
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// The setter, if the binding is two-way.
    #[must_use]
    pub fn setter(&self) -> Option<Setter<T>> {
        self.setter.clone()
    }

    #[must_use]
    pub fn is_two_way(&self) -> bool {
        self.setter.is_some()
    }

    /// Write `value` back. Returns `false` for a one-way binding.
    pub fn set(&self, value: T) -> bool {
        match &self.setter {
            Some(setter) => {
                setter(value);
                true
            }
            None => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundValue")
            .field("value", &self.value)
            .field("two_way", &self.is_two_way())
            .finish()
    }
}

/// Binds a view-model selection to a builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bind;

impl Bind {
    /// Resolve `V` from `point`'s scope and mount a view rendering
    /// `builder(selector(&vm))`.
    ///
    /// # Errors
    ///
    /// [`Error::ResolutionNotFound`](weft_runtime::Error::ResolutionNotFound)
    /// when no scope in the chain (nor the global registry) provides `V`.
    pub fn mount<V, T, O>(
        point: &MountPoint,
        selector: impl Fn(&V) -> Selection<T> + 'static,
        builder: impl Fn(BoundValue<T>, &RenderCx<'_>) -> O + 'static,
    ) -> Result<TrackedView<O>>
    where
        V: 'static,
        T: Clone + 'static,
        O: 'static,
    {
        let vm = point.scope().resolve::<V>()?;
        Ok(TrackedView::mount(point, move |cx| {
            let bound = selector(&*vm).into_bound();
            builder(bound, cx)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RenderScheduler;
    use weft_runtime::ScopeRegistry;

    struct Form {
        name: Observable<String>,
        age: Observable<u32>,
    }

    fn mounted() -> (MountPoint, Rc<Form>) {
        let scope = ScopeRegistry::root();
        let form = Rc::new(Form {
            name: Observable::new("ada".to_string()),
            age: Observable::new(36),
        });
        scope.provide(Rc::clone(&form)).unwrap();
        (MountPoint::new(RenderScheduler::new(), scope), form)
    }

    #[test]
    fn two_way_setter_writes_back() {
        let (point, form) = mounted();
        let view = Bind::mount(
            &point,
            |f: &Form| Selection::TwoWay(f.name.clone()),
            |bound, _| bound,
        )
        .unwrap();

        let bound = view.output().unwrap();
        assert!(bound.is_two_way());
        assert_eq!(bound.value(), "ada");
        assert!(bound.set("grace".to_string()));
        assert_eq!(form.name.get_untracked(), "grace");

        assert_eq!(point.scheduler().flush(), 1);
        assert_eq!(view.output().unwrap().value(), "grace");
    }

    #[test]
    fn one_way_has_no_setter() {
        let (point, form) = mounted();
        let view = Bind::mount(
            &point,
            |f: &Form| Selection::OneWay(format!("{} ({})", f.name.get(), f.age.get())),
            |bound, _| bound.into_value(),
        )
        .unwrap();
        assert_eq!(view.output().as_deref(), Some("ada (36)"));
        assert_eq!(view.subscribed_ids().len(), 2);

        form.age.set(37);
        point.scheduler().flush();
        assert_eq!(view.output().as_deref(), Some("ada (37)"));
    }

    #[test]
    fn one_way_bound_set_is_refused() {
        let bound = Selection::OneWay(3).into_bound();
        assert!(!bound.set(4));
        assert_eq!(*bound.value(), 3);
    }

    #[test]
    fn missing_view_model_is_an_error() {
        let point = MountPoint::new(RenderScheduler::new(), ScopeRegistry::root());
        let err = Bind::mount(&point, |f: &Form| Selection::OneWay(f.age.get()), |b, _| b)
            .unwrap_err();
        assert!(matches!(err, weft_runtime::Error::ResolutionNotFound { .. }));
    }
}
