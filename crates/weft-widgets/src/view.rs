#![forbid(unsafe_code)]

//! Tracked views: the general render wrapper.
//!
//! A [`TrackedView`] owns one render function. Every render runs inside a
//! tracking session with a deferred context at the view's own
//! [`RenderPosition`]; afterwards the view reconciles its subscriptions with
//! what the render read. A change notification on any subscribed node
//! schedules the view on its [`RenderScheduler`]; the next flush re-renders.
//!
//! Reads performed after the render returned, by callbacks the host invokes
//! under the view's position (lazy list items), are subscribed as they
//! happen through the deferred session's access hook.
//!
//! # Failure Modes
//!
//! - **Render panics**: the view subscribes to whatever the render read
//!   before panicking (so fixing an input re-renders it), keeps its previous
//!   output, and the panic continues to the caller with its original payload.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use weft_runtime::reactive::tracker::{self, run_tracked_with_deferred_context};
use weft_runtime::reactive::{
    DeferredHandle, NodeId, ReconcileReport, RenderPosition, Subscription, SubscriptionSet,
};
use weft_runtime::{Result, ScopeRegistry};

use crate::lazy_list::LazyList;
use crate::scheduler::{RenderScheduler, Rerender, ViewId};

#[cfg(feature = "tracing")]
use web_time::Instant;

/// Where a view is mounted: the scheduler it re-renders through, the scope it
/// resolves from, and the render position it nests under.
#[derive(Clone, Debug)]
pub struct MountPoint {
    scheduler: RenderScheduler,
    scope: ScopeRegistry,
    position: RenderPosition,
}

impl MountPoint {
    /// A mount point at a new root position.
    #[must_use]
    pub fn new(scheduler: RenderScheduler, scope: ScopeRegistry) -> Self {
        Self {
            scheduler,
            scope,
            position: RenderPosition::root(),
        }
    }

    /// Same scheduler and position, different scope.
    #[must_use]
    pub fn with_scope(&self, scope: ScopeRegistry) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// Same scheduler and scope, nested one position deeper.
    #[must_use]
    pub fn nested(&self) -> Self {
        Self {
            position: self.position.child(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn scope(&self) -> &ScopeRegistry {
        &self.scope
    }

    #[must_use]
    pub fn position(&self) -> &RenderPosition {
        &self.position
    }
}

/// Context handed to render functions.
pub struct RenderCx<'a> {
    view_id: ViewId,
    scope: &'a ScopeRegistry,
    position: &'a RenderPosition,
}

impl RenderCx<'_> {
    #[must_use]
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    #[must_use]
    pub fn scope(&self) -> &ScopeRegistry {
        self.scope
    }

    #[must_use]
    pub fn position(&self) -> &RenderPosition {
        self.position
    }

    /// Resolve a service from the view's scope (nearest-wins).
    pub fn resolve<T: 'static>(&self) -> Result<Rc<T>> {
        self.scope.resolve::<T>()
    }

    /// A lazy list whose items report reads to this view.
    pub fn lazy_list<O>(&self, len: usize, builder: impl Fn(usize) -> O + 'static) -> LazyList<O> {
        LazyList::at(self.position.clone(), len, builder)
    }
}

type RenderFn<O> = Box<dyn Fn(&RenderCx<'_>) -> O>;

struct ViewInner<O> {
    id: ViewId,
    me: Weak<ViewInner<O>>,
    render: RenderFn<O>,
    scheduler: RenderScheduler,
    scope: ScopeRegistry,
    position: RenderPosition,
    subscriptions: Rc<RefCell<SubscriptionSet>>,
    /// Subscriptions owned by the view outside reconciliation.
    held: RefCell<Vec<Subscription>>,
    deferred: RefCell<Option<DeferredHandle>>,
    output: RefCell<Option<O>>,
    renders: Cell<u64>,
    last_report: RefCell<ReconcileReport>,
    mounted: Cell<bool>,
}

impl<O: 'static> ViewInner<O> {
    fn schedule(&self) -> bool {
        let weak: Weak<dyn Rerender> = self.me.clone();
        self.scheduler.schedule(self.id, weak)
    }

    fn render_pass(&self) {
        if !self.mounted.get() {
            return;
        }

        #[cfg(feature = "tracing")]
        let render_start = Instant::now();
        #[cfg(feature = "tracing")]
        let render_span = tracing::debug_span!(
            "weft.render",
            view = self.id.raw(),
            render = self.renders.get() + 1,
            render_duration_us = tracing::field::Empty
        );
        #[cfg(feature = "tracing")]
        let _render_guard = render_span.enter();

        let cx = RenderCx {
            view_id: self.id,
            scope: &self.scope,
            position: &self.position,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_tracked_with_deferred_context(&self.position, || (self.render)(&cx))
        }));

        let tracked = match result {
            Ok(tracked) => tracked,
            Err(payload) => {
                // The previous render's deferred session and hook stay open.
                if let Some(partial) = tracker::take_failed_access() {
                    let report = self.subscriptions.borrow_mut().reconcile(&partial);
                    *self.last_report.borrow_mut() = report;
                }
                #[cfg(feature = "tracing")]
                tracing::debug!(view = self.id.raw(), "render panicked; partial reads subscribed");
                panic::resume_unwind(payload);
            }
        };

        let report = self.subscriptions.borrow_mut().reconcile(&tracked.accessed);
        let subscriptions = Rc::clone(&self.subscriptions);
        tracked.deferred.on_access(move |node| {
            subscriptions.borrow_mut().extend(node);
        });
        *self.deferred.borrow_mut() = Some(tracked.deferred);
        *self.output.borrow_mut() = Some(tracked.value);
        *self.last_report.borrow_mut() = report;
        self.renders.set(self.renders.get() + 1);

        #[cfg(feature = "tracing")]
        {
            let elapsed_us = render_start.elapsed().as_micros() as u64;
            render_span.record("render_duration_us", elapsed_us);
        }
    }
}

impl<O: 'static> Rerender for ViewInner<O> {
    fn view_id(&self) -> ViewId {
        self.id
    }

    fn rerender(&self) {
        self.render_pass();
    }
}

/// A mounted render function with automatic dependency tracking.
///
/// Cloning shares the same view. The view stays mounted until
/// [`unmount`](Self::unmount) or until the last handle is dropped.
pub struct TrackedView<O> {
    inner: Rc<ViewInner<O>>,
}

impl<O> Clone for TrackedView<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<O: 'static> TrackedView<O> {
    /// Mount `render` under `point` and render it once.
    ///
    /// # Panics
    ///
    /// If the first render panics (the panic propagates unchanged).
    pub fn mount(point: &MountPoint, render: impl Fn(&RenderCx<'_>) -> O + 'static) -> Self {
        let id = ViewId::next();
        let inner = Rc::new_cyclic(|me: &Weak<ViewInner<O>>| {
            let weak = me.clone();
            let on_change = move || {
                if let Some(view) = weak.upgrade() {
                    view.schedule();
                }
            };
            ViewInner {
                id,
                me: me.clone(),
                render: Box::new(render),
                scheduler: point.scheduler.clone(),
                scope: point.scope.clone(),
                position: point.position.child(),
                subscriptions: Rc::new(RefCell::new(SubscriptionSet::new(on_change))),
                held: RefCell::new(Vec::new()),
                deferred: RefCell::new(None),
                output: RefCell::new(None),
                renders: Cell::new(0),
                last_report: RefCell::new(ReconcileReport::default()),
                mounted: Cell::new(true),
            }
        });
        inner.render_pass();
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> ViewId {
        self.inner.id
    }

    /// Borrow the latest output.
    pub fn with_output<R>(&self, f: impl FnOnce(Option<&O>) -> R) -> R {
        f(self.inner.output.borrow().as_ref())
    }

    /// Number of completed renders.
    #[must_use]
    pub fn render_count(&self) -> u64 {
        self.inner.renders.get()
    }

    /// Nodes the view is subscribed to, ascending.
    #[must_use]
    pub fn subscribed_ids(&self) -> Vec<NodeId> {
        self.inner.subscriptions.borrow().ids()
    }

    /// Reconciliation outcome of the latest render.
    #[must_use]
    pub fn last_report(&self) -> ReconcileReport {
        self.inner.last_report.borrow().clone()
    }

    /// The deferred session of the latest render.
    #[must_use]
    pub fn deferred(&self) -> Option<DeferredHandle> {
        self.inner.deferred.borrow().clone()
    }

    /// The view's render position (items built under it report here).
    #[must_use]
    pub fn position(&self) -> &RenderPosition {
        &self.inner.position
    }

    /// Keep `subscription` alive for as long as the view is mounted.
    pub fn hold(&self, subscription: Subscription) {
        self.inner.held.borrow_mut().push(subscription);
    }

    /// A callback that schedules this view; for explicit subscriptions.
    #[must_use]
    pub fn scheduler_callback(&self) -> impl Fn() + 'static {
        let weak = Rc::downgrade(&self.inner);
        move || {
            if let Some(view) = weak.upgrade() {
                view.schedule();
            }
        }
    }

    /// Queue a re-render. Returns `false` if already queued.
    pub fn schedule(&self) -> bool {
        self.inner.schedule()
    }

    /// Render now, bypassing the scheduler.
    pub fn rerender(&self) {
        self.inner.render_pass();
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// Drop every subscription and stop rendering.
    pub fn unmount(&self) {
        if !self.inner.mounted.replace(false) {
            return;
        }
        self.inner.subscriptions.borrow_mut().clear();
        self.inner.held.borrow_mut().clear();
        self.inner.position.detach();
        self.inner.deferred.borrow_mut().take();
        #[cfg(feature = "tracing")]
        tracing::debug!(view = self.inner.id.raw(), "view unmounted");
    }
}

impl<O: Clone + 'static> TrackedView<O> {
    /// Clone of the latest output.
    #[must_use]
    pub fn output(&self) -> Option<O> {
        self.inner.output.borrow().clone()
    }
}

impl<O> fmt::Debug for TrackedView<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedView")
            .field("id", &self.inner.id)
            .field("renders", &self.inner.renders.get())
            .field("subscriptions", &self.inner.subscriptions.borrow().len())
            .field("mounted", &self.inner.mounted.get())
            .finish()
    }
}
