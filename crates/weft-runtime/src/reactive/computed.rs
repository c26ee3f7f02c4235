#![forbid(unsafe_code)]

//! Lazy computed values derived from an explicit dependency list.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. It subscribes to every node in its dependency
//! list; a change notification from any of them marks the cache dirty and is
//! forwarded to the computed's own listeners. The next read recomputes.
//!
//! Recomputation runs untracked: a tracked render that reads a computed
//! depends on the computed node only, never on its upstream nodes.
//!
//! # Invariants
//!
//! 1. A read never returns a value older than the last dependency
//!    notification.
//! 2. The compute function runs at most once between two dependency
//!    notifications.
//! 3. If nothing changed, a read returns the cached value in O(1).
//! 4. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: The cached value remains from the last
//!   successful computation. The dirty flag stays set so the next read will
//!   retry.
//! - **Dependency dropped**: The subscription becomes inert. The computed
//!   value retains its last cached result and never becomes dirty again from
//!   that source.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::node::{Disposable, NodeHandle, NodeId, NodeKind, ObservableNode, Subscription};
use super::observable::Observable;
use super::tracker;
use crate::error::Result;

struct ComputedInner<T> {
    node: NodeHandle,
    compute: Box<dyn Fn() -> T>,
    /// None only before the first successful computation.
    cached: RefCell<Option<T>>,
    dirty: Cell<bool>,
    version: Cell<u64>,
    dependencies: Vec<NodeHandle>,
    /// Listener registrations on `dependencies`; cleared on dispose.
    upstream: RefCell<Vec<Subscription>>,
}

/// A lazily-evaluated, memoized value derived from other nodes.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Computed");
        s.field("node", &self.inner.node.describe());
        match self.inner.cached.try_borrow() {
            Ok(v) => s.field("cached", &*v),
            Err(_) => s.field("cached", &"<borrowed>"),
        };
        s.field("dirty", &self.inner.dirty.get())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: 'static> Computed<T> {
    /// Create a computed value over `dependencies`.
    ///
    /// Fails with `UseAfterDispose` if a dependency was already disposed.
    pub fn try_new(
        dependencies: &[&dyn ObservableNode],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Self> {
        Self::build(None, dependencies, compute)
    }

    /// Create a computed value over `dependencies`.
    ///
    /// # Panics
    ///
    /// If a dependency was already disposed.
    pub fn new(dependencies: &[&dyn ObservableNode], compute: impl Fn() -> T + 'static) -> Self {
        match Self::try_new(dependencies, compute) {
            Ok(c) => c,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`try_new`](Self::try_new) with a diagnostic label.
    pub fn labeled(
        label: impl Into<Cow<'static, str>>,
        dependencies: &[&dyn ObservableNode],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Self> {
        Self::build(Some(label.into()), dependencies, compute)
    }

    pub(crate) fn build(
        label: Option<Cow<'static, str>>,
        dependencies: &[&dyn ObservableNode],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Self> {
        for dep in dependencies {
            dep.node().ensure_live()?;
        }
        let inner = Rc::new(ComputedInner {
            node: NodeHandle::new(NodeKind::Computed, label),
            compute: Box::new(compute),
            cached: RefCell::new(None),
            dirty: Cell::new(true), // Computed on first read.
            version: Cell::new(0),
            dependencies: dependencies.iter().map(|d| d.node().clone()).collect(),
            upstream: RefCell::new(Vec::new()),
        });

        let mut upstream = Vec::with_capacity(dependencies.len());
        for dep in &inner.dependencies {
            let weak = Rc::downgrade(&inner);
            upstream.push(dep.add_listener(move || {
                if let Some(strong) = weak.upgrade() {
                    strong.dirty.set(true);
                    strong.node.notify();
                }
            })?);
        }
        *inner.upstream.borrow_mut() = upstream;

        Ok(Self { inner })
    }

    /// Recompute if dirty. The cache and dirty flag are only touched after
    /// the compute function returns.
    fn refresh(&self) {
        let stale = self.inner.dirty.get() || self.inner.cached.borrow().is_none();
        if !stale {
            return;
        }
        let value = tracker::untracked(|| (self.inner.compute)());
        *self.inner.cached.borrow_mut() = Some(value);
        self.inner.dirty.set(false);
        self.inner.version.set(self.inner.version.get() + 1);
    }

    /// Access the current value by reference, recomputing if needed.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.node.ensure_live()?;
        self.inner.node.track();
        self.refresh();
        let cached = self.inner.cached.borrow();
        Ok(f(cached
            .as_ref()
            .expect("cached is always Some after refresh")))
    }

    /// Access the current value by reference, recomputing if needed.
    ///
    /// # Panics
    ///
    /// If the computed was disposed, or if the closure reads this same
    /// `Computed` while it is dirty (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(r) => r,
            Err(err) => panic!("{err}"),
        }
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Force recomputation on the next read and notify listeners.
    pub fn try_invalidate(&self) -> Result<()> {
        self.inner.node.ensure_live()?;
        self.inner.dirty.set(true);
        self.inner.node.notify();
        Ok(())
    }

    /// Force recomputation on the next read and notify listeners.
    ///
    /// # Panics
    ///
    /// If the computed was disposed.
    pub fn invalidate(&self) {
        if let Err(err) = self.try_invalidate() {
            panic!("{err}");
        }
    }

    /// Current version number. Increments by 1 on each recomputation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Ids of the declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<NodeId> {
        self.inner.dependencies.iter().map(NodeHandle::id).collect()
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed value derived from a single observable.
    pub fn from_observable<S: 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let s = source.clone();
        Self::new(&[source], move || s.with(|v| map(v)))
    }

    /// Create a computed value derived from two observables.
    pub fn from2<S1: 'static, S2: 'static>(
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        map: impl Fn(&S1, &S2) -> T + 'static,
    ) -> Self {
        let (a, b) = (s1.clone(), s2.clone());
        Self::new(&[s1, s2], move || a.with(|v1| b.with(|v2| map(v1, v2))))
    }

    /// Create a computed value derived from three observables.
    pub fn from3<S1: 'static, S2: 'static, S3: 'static>(
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        s3: &Observable<S3>,
        map: impl Fn(&S1, &S2, &S3) -> T + 'static,
    ) -> Self {
        let (a, b, c) = (s1.clone(), s2.clone(), s3.clone());
        Self::new(&[s1, s2, s3], move || {
            a.with(|v1| b.with(|v2| c.with(|v3| map(v1, v2, v3))))
        })
    }

    /// Current value, recomputing if any dependency has changed.
    pub fn try_get(&self) -> Result<T> {
        self.try_with(T::clone)
    }

    /// Current value, recomputing if any dependency has changed.
    ///
    /// # Panics
    ///
    /// If the computed was disposed.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }
}

impl<T> ObservableNode for Computed<T> {
    fn node(&self) -> &NodeHandle {
        &self.inner.node
    }
}

impl<T> Disposable for Computed<T> {
    fn dispose(&self) {
        // Dropping the registrations detaches from every dependency.
        let upstream = std::mem::take(&mut *self.inner.upstream.borrow_mut());
        drop(upstream);
        self.inner.node.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::tracker::run_tracked_sync;

    fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let c = Rc::new(Cell::new(0u32));
        (Rc::clone(&c), c)
    }

    #[test]
    fn single_dep_computed() {
        let source = Observable::new(10);
        let computed = Computed::from_observable(&source, |v| v * 2);

        assert_eq!(computed.get(), 20);
        assert_eq!(computed.version(), 1);

        source.set(5);
        assert!(computed.is_dirty());
        assert_eq!(computed.get(), 10);
        assert_eq!(computed.version(), 2);
    }

    #[test]
    fn multi_dep_computed() {
        let width = Observable::new(10);
        let height = Observable::new(20);
        let area = Computed::from2(&width, &height, |w, h| w * h);

        assert_eq!(area.get(), 200);
        width.set(5);
        assert_eq!(area.get(), 100);
        height.set(30);
        assert_eq!(area.get(), 150);
    }

    #[test]
    fn three_dep_computed() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let c = Observable::new(3);
        let sum = Computed::from3(&a, &b, &c, |x, y, z| x + y + z);

        assert_eq!(sum.get(), 6);
        a.set(10);
        assert_eq!(sum.get(), 15);
        c.set(100);
        assert_eq!(sum.get(), 112);
    }

    #[test]
    fn lazy_and_memoized() {
        let (runs, seen) = counter();
        let source = Observable::new(10);
        let s = source.clone();
        let computed = Computed::new(&[&source], move || {
            runs.set(runs.get() + 1);
            s.get() * 2
        });

        // Not computed yet.
        assert_eq!(seen.get(), 0);
        assert_eq!(computed.get(), 20);
        assert_eq!(computed.get(), 20);
        assert_eq!(seen.get(), 1);

        // Several notifications, one recompute.
        source.set(11);
        source.set(12);
        assert_eq!(computed.get(), 24);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn dependency_change_notifies_listeners() {
        let source = Observable::new(1);
        let doubled = Computed::from_observable(&source, |v| v * 2);
        let (hits, seen) = counter();
        let _sub = doubled.add_listener(move || hits.set(hits.get() + 1)).unwrap();
        source.set(2);
        assert_eq!(seen.get(), 1);
        assert!(doubled.is_dirty());
    }

    #[test]
    fn invalidate_forces_recompute_and_notifies() {
        let source = Observable::new(5);
        let computed = Computed::from_observable(&source, |v| *v);
        let (hits, seen) = counter();
        let _sub = computed.add_listener(move || hits.set(hits.get() + 1)).unwrap();

        let _ = computed.get();
        computed.invalidate();
        assert!(computed.is_dirty());
        assert_eq!(seen.get(), 1);
        let _ = computed.get();
        assert_eq!(computed.version(), 2);
    }

    #[test]
    fn with_access() {
        let source = Observable::new(vec![1, 2, 3]);
        let computed = Computed::from_observable(&source, |v| v.iter().sum::<i32>());
        assert_eq!(computed.with(|sum| *sum), 6);
    }

    #[test]
    fn tracked_read_reports_computed_only() {
        let a = Observable::new(2);
        let b = Observable::new(3);
        let product = Computed::from2(&a, &b, |x, y| x * y);

        let tracked = run_tracked_sync(|| product.get());
        assert_eq!(tracked.value, 6);
        assert_eq!(tracked.accessed.ids(), vec![product.id()]);
    }

    #[test]
    fn untracked_read_recomputes_normally() {
        let a = Observable::new(2);
        let doubled = Computed::from_observable(&a, |v| v * 2);
        a.set(4);
        assert_eq!(doubled.get(), 8);
    }

    #[test]
    fn panicking_compute_keeps_previous_cache() {
        let source = Observable::new(1);
        let s = source.clone();
        let computed = Computed::new(&[&source], move || {
            let v = s.get();
            assert!(v != 13, "unlucky");
            v
        });
        assert_eq!(computed.get(), 1);

        source.set(13);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| computed.get()));
        assert!(result.is_err());
        assert!(computed.is_dirty());
        assert_eq!(computed.version(), 1);
        assert_eq!(tracker::session_depth(), 0);

        source.set(2);
        assert_eq!(computed.get(), 2);
    }

    #[test]
    fn dispose_detaches_from_dependencies() {
        let source = Observable::new(1);
        let computed = Computed::from_observable(&source, |v| *v);
        assert_eq!(source.listener_count(), 1);

        computed.dispose();
        assert_eq!(source.listener_count(), 0);
        assert!(computed.try_get().unwrap_err().is_use_after_dispose());
        // Dependency writes are now invisible to the computed.
        source.set(2);
        assert!(computed.is_disposed());
    }

    #[test]
    fn invalidate_after_dispose_fails() {
        let source = Observable::new(1);
        let computed = Computed::from_observable(&source, |v| *v);
        let (hits, seen) = counter();
        let _sub = computed.add_listener(move || hits.set(hits.get() + 1)).unwrap();

        computed.dispose();
        assert!(computed.try_invalidate().unwrap_err().is_use_after_dispose());
        assert_eq!(seen.get(), 0);
    }

    #[test]
    #[should_panic(expected = "was used after it was disposed")]
    fn invalidate_after_dispose_panics() {
        let source = Observable::new(1);
        let computed = Computed::from_observable(&source, |v| *v);
        computed.dispose();
        computed.invalidate();
    }

    #[test]
    fn disposed_dependency_is_rejected() {
        let source = Observable::new(1);
        source.dispose();
        let err = Computed::try_new(&[&source], || 0).unwrap_err();
        assert!(err.is_use_after_dispose());
    }

    #[test]
    fn chained_computeds() {
        let a = Observable::new(10);
        let b = Computed::from_observable(&a, |v| v + 1);
        let b2 = b.clone();
        let c = Computed::new(&[&b], move || b2.get() * 2);

        assert_eq!(c.get(), 22);
        a.set(5);
        assert!(c.is_dirty());
        assert_eq!(c.get(), 12);
    }

    #[test]
    fn equal_write_leaves_computed_clean() {
        let source = Observable::new(42);
        let computed = Computed::from_observable(&source, |v| *v);
        let _ = computed.get();
        source.set(42);
        assert!(!computed.is_dirty());
        assert_eq!(computed.version(), 1);
    }

    #[test]
    fn computed_survives_source_drop() {
        let computed;
        {
            let source = Observable::new(42);
            computed = Computed::from_observable(&source, |v| *v);
            let _ = computed.get();
        }
        assert_eq!(computed.get(), 42);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn dependencies_in_declaration_order() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let sum = Computed::from2(&b, &a, |x, y| x + y);
        assert_eq!(sum.dependencies(), vec![b.id(), a.id()]);
    }

    #[test]
    fn debug_format() {
        let source = Observable::new(42);
        let computed = Computed::from_observable(&source, |v| *v);
        let _ = computed.get();
        let dbg = format!("{computed:?}");
        assert!(dbg.contains("Computed"));
        assert!(dbg.contains("42"));
    }
}
