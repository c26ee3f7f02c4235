#![forbid(unsafe_code)]

//! Render positions and deferred tracking sessions.
//!
//! A [`RenderPosition`] is a node in the tree of mounted renders. It is not a
//! call stack: a callback invoked long after its render returned can still be
//! run "at" the position it was created under with [`RenderPosition::enter`],
//! and reads it performs report to the nearest deferred session attached to
//! that position or one of its ancestors.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::node::NodeHandle;
use super::tracker::{self, AccessSet, SessionId};

type AccessHook = Rc<dyn Fn(&NodeHandle)>;

/// A tracking session that outlives its synchronous render.
pub struct DeferredSession {
    id: SessionId,
    accessed: RefCell<AccessSet>,
    open: Cell<bool>,
    hook: RefCell<Option<AccessHook>>,
}

impl DeferredSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            accessed: RefCell::new(AccessSet::new()),
            open: Cell::new(true),
            hook: RefCell::new(None),
        }
    }

    pub(crate) fn record(&self, node: &NodeHandle) {
        if !self.open.get() {
            return;
        }
        let inserted = self.accessed.borrow_mut().insert(node);
        if !inserted {
            return;
        }
        // Hook runs with no borrows held; it usually subscribes.
        let hook = self.hook.borrow().clone();
        if let Some(hook) = hook {
            hook(node);
        }
    }

    fn close(&self) {
        self.open.set(false);
        self.hook.borrow_mut().take();
    }
}

/// Handle to the deferred session opened by
/// [`run_tracked_with_deferred_context`](super::tracker::run_tracked_with_deferred_context).
#[derive(Clone)]
pub struct DeferredHandle {
    session: Rc<DeferredSession>,
}

impl DeferredHandle {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    /// Nodes reported after the synchronous render returned.
    #[must_use]
    pub fn accessed(&self) -> AccessSet {
        self.session.accessed.borrow().clone()
    }

    /// False once a newer render replaced this session, or after [`close`](Self::close).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.open.get()
    }

    /// Call `hook` for each node newly reported into this session.
    pub fn on_access(&self, hook: impl Fn(&NodeHandle) + 'static) {
        *self.session.hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Stop accepting reports.
    pub fn close(&self) {
        self.session.close();
    }
}

impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("id", &self.session.id)
            .field("open", &self.session.open.get())
            .field("accessed", &*self.session.accessed.borrow())
            .finish()
    }
}

struct PositionInner {
    parent: Option<RenderPosition>,
    deferred: RefCell<Option<Rc<DeferredSession>>>,
}

/// A node in the render-position tree.
///
/// Cloning shares the same position.
#[derive(Clone)]
pub struct RenderPosition {
    inner: Rc<PositionInner>,
}

impl RenderPosition {
    /// A new tree root.
    #[must_use]
    pub fn root() -> Self {
        Self {
            inner: Rc::new(PositionInner {
                parent: None,
                deferred: RefCell::new(None),
            }),
        }
    }

    /// A new position nested under this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Rc::new(PositionInner {
                parent: Some(self.clone()),
                deferred: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<&RenderPosition> {
        self.inner.parent.as_ref()
    }

    /// Distance from the root (root is 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(p) = cursor {
            depth += 1;
            cursor = p.parent();
        }
        depth
    }

    /// The innermost position entered on this thread, if any.
    #[must_use]
    pub fn current() -> Option<RenderPosition> {
        tracker::current_position()
    }

    /// Run `f` with this position entered.
    ///
    /// The position is left when `f` returns or unwinds.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Leave<'a>(&'a RenderPosition);
        impl Drop for Leave<'_> {
            fn drop(&mut self) {
                if !tracker::pop_position(self.0) {
                    tracing::warn!("render position left out of nesting order");
                }
            }
        }

        tracker::push_position(self.clone());
        let _leave = Leave(self);
        f()
    }

    /// Deferred session attached here or on the nearest ancestor that has an
    /// open one.
    pub(crate) fn nearest_deferred(&self) -> Option<Rc<DeferredSession>> {
        let mut cursor = Some(self);
        while let Some(p) = cursor {
            if let Some(session) = p.inner.deferred.borrow().as_ref()
                && session.open.get()
            {
                return Some(Rc::clone(session));
            }
            cursor = p.parent();
        }
        None
    }

    /// Attach a fresh deferred session, closing the previous one.
    pub(crate) fn open_deferred(&self, id: SessionId) -> DeferredHandle {
        let session = Rc::new(DeferredSession::new(id));
        let previous = self.inner.deferred.replace(Some(Rc::clone(&session)));
        if let Some(previous) = previous {
            previous.close();
        }
        DeferredHandle { session }
    }

    /// Close and remove the deferred session attached here (unmount).
    pub fn detach(&self) {
        if let Some(previous) = self.inner.deferred.borrow_mut().take() {
            previous.close();
        }
    }

    #[must_use]
    pub fn has_open_deferred(&self) -> bool {
        self.inner
            .deferred
            .borrow()
            .as_ref()
            .is_some_and(|s| s.open.get())
    }
}

impl PartialEq for RenderPosition {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RenderPosition {}

impl fmt::Debug for RenderPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPosition")
            .field("depth", &self.depth())
            .field("deferred", &self.has_open_deferred())
            .finish()
    }
}
