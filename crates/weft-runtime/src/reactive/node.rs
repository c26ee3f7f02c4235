#![forbid(unsafe_code)]

//! Node identity, listener dispatch, and RAII subscriptions.
//!
//! Every observable thing in the graph (property, computed, object, command)
//! owns exactly one [`NodeHandle`]. The handle carries identity for the
//! tracker and the listener list for change notification; the typed wrappers
//! in the sibling modules only add storage on top of it.
//!
//! # Invariants
//!
//! 1. Node identity is reference identity: two handles are equal iff they
//!    point at the same node ([`NodeId`] equality).
//! 2. Listeners run synchronously, in registration order, exactly once per
//!    [`NodeHandle::notify`] call.
//! 3. A listener removed while a dispatch is running is not invoked by the
//!    remainder of that dispatch; a listener added during a dispatch first
//!    fires on the next one.
//! 4. `disposed` goes false→true once. After that, registration fails and
//!    dispatch is a no-op.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::reactive::tracker;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a node, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A mutable value ([`Observable`](super::Observable)).
    Property,
    /// A derived value ([`Computed`](super::Computed)).
    Computed,
    /// An aggregate ([`ObservableObject`](super::ObservableObject)).
    Object,
    /// The can-execute-changed channel of a command.
    Command,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "property",
            Self::Computed => "computed",
            Self::Object => "object",
            Self::Command => "command",
        })
    }
}

/// Anything that can be torn down exactly once.
///
/// Owners ([`ObservableObject`](super::ObservableObject), scope registries)
/// hold their children as `Rc<dyn Disposable>`.
pub trait Disposable {
    /// Release the resource. Must be idempotent.
    fn dispose(&self);

    /// Whether [`dispose`](Disposable::dispose) has run.
    fn is_disposed(&self) -> bool;
}

/// Implemented by every type that owns a [`NodeHandle`].
pub trait ObservableNode {
    /// The node backing this value.
    fn node(&self) -> &NodeHandle;

    /// Identity of the backing node.
    fn id(&self) -> NodeId {
        self.node().id()
    }

    /// Register a change listener on the backing node.
    fn add_listener(&self, listener: impl Fn() + 'static) -> Result<Subscription>
    where
        Self: Sized,
    {
        self.node().add_listener(listener)
    }
}

struct ListenerSlot {
    id: u64,
    active: Cell<bool>,
    callback: Box<dyn Fn()>,
}

pub(crate) struct NodeCore {
    id: NodeId,
    kind: NodeKind,
    label: Option<Cow<'static, str>>,
    listeners: RefCell<Vec<Rc<ListenerSlot>>>,
    next_listener: Cell<u64>,
    disposed: Cell<bool>,
}

/// Shared handle to a node. Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct NodeHandle {
    core: Rc<NodeCore>,
}

impl NodeHandle {
    pub(crate) fn new(kind: NodeKind, label: Option<Cow<'static, str>>) -> Self {
        Self {
            core: Rc::new(NodeCore {
                id: NodeId::next(),
                kind,
                label,
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(0),
                disposed: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.core.id
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.core.kind
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.core.label.as_deref()
    }

    /// Human-readable description, e.g. `property "count" (#12)`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.label() {
            Some(label) => format!("{} {:?} ({})", self.kind(), label, self.id()),
            None => format!("{} {}", self.kind(), self.id()),
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.get()
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.core.listeners.borrow().len()
    }

    /// Register `listener` to run on every change notification.
    ///
    /// The returned [`Subscription`] removes exactly this registration when
    /// unsubscribed or dropped.
    ///
    /// # Errors
    ///
    /// [`Error::UseAfterDispose`] if the node is disposed.
    pub fn add_listener(&self, listener: impl Fn() + 'static) -> Result<Subscription> {
        self.ensure_live()?;
        let id = self.core.next_listener.get();
        self.core.next_listener.set(id + 1);
        let slot = Rc::new(ListenerSlot {
            id,
            active: Cell::new(true),
            callback: Box::new(listener),
        });
        let weak_slot = Rc::downgrade(&slot);
        self.core.listeners.borrow_mut().push(slot);
        Ok(Subscription {
            node: Rc::downgrade(&self.core),
            node_id: self.core.id,
            slot: weak_slot,
            listener_id: id,
        })
    }

    /// Report a read of this node to the active tracking session, if any.
    #[inline]
    pub fn track(&self) {
        tracker::report_access(self);
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::use_after_dispose(self.describe()));
        }
        Ok(())
    }

    /// Dispatch a change notification to the current listeners.
    pub(crate) fn notify(&self) {
        if self.is_disposed() {
            return;
        }
        // Snapshot so listeners may (un)subscribe while we dispatch.
        let snapshot: Vec<Rc<ListenerSlot>> = self.core.listeners.borrow().clone();
        for slot in snapshot {
            if slot.active.get() {
                (slot.callback)();
            }
        }
    }

    /// Flip to disposed and drop every listener. Returns `false` if the node
    /// was already disposed.
    pub(crate) fn mark_disposed(&self) -> bool {
        if self.core.disposed.replace(true) {
            return false;
        }
        let listeners = std::mem::take(&mut *self.core.listeners.borrow_mut());
        for slot in &listeners {
            slot.active.set(false);
        }
        true
    }
}

impl ObservableNode for NodeHandle {
    fn node(&self) -> &NodeHandle {
        self
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for NodeHandle {}

impl std::hash::Hash for NodeHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.core.id)
            .field("kind", &self.core.kind)
            .field("label", &self.core.label)
            .field("listeners", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Disposer capability returned by [`NodeHandle::add_listener`].
///
/// [`unsubscribe`](Subscription::unsubscribe) is idempotent. Dropping the
/// subscription also unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    node: Weak<NodeCore>,
    node_id: NodeId,
    slot: Weak<ListenerSlot>,
    listener_id: u64,
}

impl Subscription {
    /// Remove the registration. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.active.set(false);
        }
        if let Some(core) = self.node.upgrade() {
            let id = self.listener_id;
            let removed = {
                let mut listeners = core.listeners.borrow_mut();
                listeners
                    .iter()
                    .position(|slot| slot.id == id)
                    .map(|index| listeners.remove(index))
            };
            // The callback may own subscriptions of its own; drop it unborrowed.
            drop(removed);
        }
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| slot.active.get())
    }

    /// The node this subscription listens to.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("node", &self.node_id)
            .field("active", &self.is_active())
            .finish()
    }
}
