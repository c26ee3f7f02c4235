#![forbid(unsafe_code)]

//! Automatic dependency tracking.
//!
//! The tracker keeps a per-thread stack of tracking sessions. A render wrapper
//! opens a session, runs the render, and closes the session; every node read
//! in between reports itself to the session on top of the stack. The closed
//! session yields the exact set of nodes the render read, which the wrapper
//! then reconciles against its previous subscriptions
//! (see [`SubscriptionSet`](super::SubscriptionSet)).
//!
//! # Fast path
//!
//! Reads vastly outnumber tracked reads, so [`report_access`] starts with a
//! single test of an `engaged` counter (open sessions plus entered render
//! positions) and returns immediately when it is zero.
//!
//! # Deferred reporting
//!
//! Some renders produce callbacks that the host invokes later, after the
//! synchronous session has closed (lazy list item builders).
//! [`run_tracked_with_deferred_context`] attaches a
//! [`DeferredSession`](super::position::DeferredSession) to the render's
//! [`RenderPosition`]; a callback that runs under that position, or any
//! descendant of it, reports into the nearest enclosing deferred session when
//! no synchronous session is open.
//!
//! # Invariants
//!
//! 1. Sessions form a strict stack; accesses go to the top session only.
//! 2. Every session is popped exactly once, including during unwinding.
//! 3. The accessed set of a session that unwound is retained and can be taken
//!    with [`take_failed_access`]; the panic payload is never touched.
//! 4. Closing a session that is not on top is `SessionStackCorruption`: it is
//!    logged, counted, and the stack is repaired before anything else runs.
//!
//! # Usage errors
//!
//! Disposing a node while a session that read it is still open is not
//! supported. Render functions must not suspend while a session is open.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{error, trace};

use super::node::{NodeHandle, NodeId, ObservableNode};
use super::position::{DeferredHandle, RenderPosition};
use crate::error::Error;

/// Identifier of a tracking session (synchronous or deferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Build an id from a raw value (diagnostics and tests).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

// ─── AccessSet ───────────────────────────────────────────────────────────────

/// Unique set of nodes read during a session.
#[derive(Clone, Default)]
pub struct AccessSet {
    nodes: AHashMap<NodeId, NodeHandle>,
}

impl AccessSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Returns `false` if it was already present.
    pub fn insert(&mut self, node: &NodeHandle) -> bool {
        if self.nodes.contains_key(&node.id()) {
            return false;
        }
        self.nodes.insert(node.id(), node.clone());
        true
    }

    #[must_use]
    pub fn contains(&self, node: &impl ObservableNode) -> bool {
        self.nodes.contains_key(&node.id())
    }

    #[must_use]
    pub fn contains_id(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate the nodes (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.values()
    }

    /// Node ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Add every node of `other`.
    pub fn extend(&mut self, other: &AccessSet) {
        for node in other.iter() {
            self.insert(node);
        }
    }
}

impl PartialEq for AccessSet {
    fn eq(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.nodes.keys().all(|id| other.nodes.contains_key(id))
    }
}

impl Eq for AccessSet {}

impl fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Per-thread tracker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    /// Panic when a session is closed out of order (after repairing the
    /// stack). Never panics while the thread is already unwinding.
    pub panic_on_corruption: bool,
    /// Keep the partial accessed set of a session closed by unwinding so a
    /// failure handler can retrieve it with [`take_failed_access`].
    pub retain_failed_access: bool,
}

impl TrackerConfig {
    /// Defaults: panic on corruption in debug builds only; retain failed sets.
    pub const DEFAULT: Self = Self {
        panic_on_corruption: cfg!(debug_assertions),
        retain_failed_access: true,
    };

    #[must_use]
    pub fn with_panic_on_corruption(mut self, enabled: bool) -> Self {
        self.panic_on_corruption = enabled;
        self
    }

    #[must_use]
    pub fn with_retain_failed_access(mut self, enabled: bool) -> Self {
        self.retain_failed_access = enabled;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ─── Thread-local state ──────────────────────────────────────────────────────

struct Session {
    id: SessionId,
    accessed: AccessSet,
    /// Untracked sessions swallow reports.
    discard: bool,
}

struct TrackerState {
    /// Open sessions plus entered render positions. Zero means "nothing can
    /// observe a read".
    engaged: Cell<usize>,
    /// Open synchronous sessions (mirrors `sessions.len()`).
    depth: Cell<usize>,
    sessions: RefCell<Vec<Session>>,
    positions: RefCell<Vec<RenderPosition>>,
    next_session: Cell<u64>,
    failed: RefCell<Option<AccessSet>>,
    corruptions: Cell<u64>,
    config: Cell<TrackerConfig>,
}

impl TrackerState {
    const fn new() -> Self {
        Self {
            engaged: Cell::new(0),
            depth: Cell::new(0),
            sessions: RefCell::new(Vec::new()),
            positions: RefCell::new(Vec::new()),
            next_session: Cell::new(1),
            failed: RefCell::new(None),
            corruptions: Cell::new(0),
            config: Cell::new(TrackerConfig::DEFAULT),
        }
    }

    fn next_session_id(&self) -> SessionId {
        let id = self.next_session.get();
        self.next_session.set(id + 1);
        SessionId(id)
    }

    fn record(&self, node: &NodeHandle) {
        if self.depth.get() > 0 {
            let mut sessions = self.sessions.borrow_mut();
            if let Some(top) = sessions.last_mut()
                && !top.discard
            {
                top.accessed.insert(node);
            }
            return;
        }
        // No synchronous session: fall back to the nearest deferred session
        // enclosing the current render position.
        let position = self.positions.borrow().last().cloned();
        if let Some(deferred) = position.and_then(|p| p.nearest_deferred()) {
            deferred.record(node);
        }
    }

    fn open(&self, discard: bool) -> SessionId {
        let id = self.next_session_id();
        self.sessions.borrow_mut().push(Session {
            id,
            accessed: AccessSet::new(),
            discard,
        });
        self.depth.set(self.depth.get() + 1);
        self.engaged.set(self.engaged.get() + 1);
        trace!(session = id.raw(), depth = self.depth.get(), discard, "tracking session opened");
        id
    }

    /// Pop `id`. On a mismatch the stack is repaired and the error returned
    /// alongside whatever the expected session had collected.
    fn close(&self, id: SessionId) -> (AccessSet, bool, Option<Error>) {
        let mut sessions = self.sessions.borrow_mut();
        let top = sessions.last().map(|s| s.id);
        if top == Some(id) {
            let session = sessions.pop().map(|s| (s.accessed, s.discard));
            drop(sessions);
            self.depth.set(self.depth.get() - 1);
            self.engaged.set(self.engaged.get() - 1);
            let (accessed, discard) = session.unwrap_or_default();
            trace!(
                session = id.raw(),
                depth = self.depth.get(),
                accessed = accessed.len(),
                "tracking session closed"
            );
            return (accessed, discard, None);
        }

        self.corruptions.set(self.corruptions.get() + 1);
        let (accessed, discard, removed) = match sessions.iter().position(|s| s.id == id) {
            Some(index) => {
                let mut drained = sessions.drain(index..);
                let expected = drained.next();
                let removed = 1 + drained.count();
                let (accessed, discard) = expected
                    .map(|s| (s.accessed, s.discard))
                    .unwrap_or_default();
                (accessed, discard, removed)
            }
            None => (AccessSet::new(), false, 0),
        };
        drop(sessions);
        self.depth.set(self.depth.get() - removed);
        self.engaged.set(self.engaged.get() - removed);
        let err = Error::SessionStackCorruption { expected: id, found: top };
        error!(
            expected = id.raw(),
            found = top.map(SessionId::raw),
            removed,
            depth = self.depth.get(),
            "{err}"
        );
        (accessed, discard, Some(err))
    }
}

thread_local! {
    static TRACKER: TrackerState = const { TrackerState::new() };
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Replace this thread's tracker configuration.
pub fn configure(config: TrackerConfig) {
    TRACKER.with(|t| t.config.set(config));
}

/// This thread's tracker configuration.
#[must_use]
pub fn config() -> TrackerConfig {
    TRACKER.with(|t| t.config.get())
}

/// True iff at least one synchronous session is open. O(1).
#[inline]
#[must_use]
pub fn is_tracking_active() -> bool {
    TRACKER.with(|t| t.depth.get() > 0)
}

/// Number of open synchronous sessions.
#[must_use]
pub fn session_depth() -> usize {
    TRACKER.with(|t| t.depth.get())
}

/// Number of out-of-order closes observed on this thread.
#[must_use]
pub fn corruption_count() -> u64 {
    TRACKER.with(|t| t.corruptions.get())
}

/// Record a read of `node`.
///
/// Called by node implementations on every read; render code never calls it
/// directly. Returns immediately when no session is open and no render
/// position is entered.
#[inline]
pub fn report_access(node: &NodeHandle) {
    TRACKER.with(|t| {
        if t.engaged.get() == 0 {
            return;
        }
        t.record(node);
    });
}

/// Snapshot of the accessed set of the session currently on top.
///
/// Usable from inside a render (or a failure handler running while the
/// session is still open). `None` when no session is open.
#[must_use]
pub fn capture_accessed() -> Option<AccessSet> {
    TRACKER.with(|t| t.sessions.borrow().last().map(|s| s.accessed.clone()))
}

/// Take the partial accessed set left behind by the most recent session that
/// was closed by unwinding.
#[must_use]
pub fn take_failed_access() -> Option<AccessSet> {
    TRACKER.with(|t| t.failed.borrow_mut().take())
}

/// Output of a tracked render.
#[derive(Debug)]
pub struct Tracked<R> {
    pub value: R,
    pub accessed: AccessSet,
}

impl<R> Tracked<R> {
    pub fn into_parts(self) -> (R, AccessSet) {
        (self.value, self.accessed)
    }
}

/// Output of a tracked render with a deferred context.
#[derive(Debug)]
pub struct DeferredTracked<R> {
    pub value: R,
    pub accessed: AccessSet,
    pub deferred: DeferredHandle,
}

/// RAII guard for one synchronous session.
///
/// Prefer [`run_tracked_sync`]; the guard is exposed for hosts that need to
/// split opening and closing across their own call structure. Guards must be
/// closed in reverse opening order.
#[must_use = "dropping the guard closes the session immediately"]
pub struct SessionGuard {
    id: SessionId,
    closed: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl SessionGuard {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Close the session and return what it collected.
    ///
    /// # Panics
    ///
    /// If the session is not on top of the stack and
    /// [`TrackerConfig::panic_on_corruption`] is set. The stack has already
    /// been repaired when the panic is raised.
    pub fn finish(mut self) -> AccessSet {
        self.closed = true;
        let (accessed, _, err) = TRACKER.with(|t| t.close(self.id));
        if let Some(err) = err {
            escalate(err);
        }
        accessed
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let unwinding = std::thread::panicking();
        let (accessed, discard, err) = TRACKER.with(|t| {
            let (accessed, discard, err) = t.close(self.id);
            if unwinding && !discard && t.config.get().retain_failed_access {
                *t.failed.borrow_mut() = Some(accessed.clone());
            }
            (accessed, discard, err)
        });
        if unwinding && !discard {
            trace!(
                session = self.id.raw(),
                accessed = accessed.len(),
                "tracking session closed by unwinding"
            );
        }
        if let Some(err) = err {
            escalate(err);
        }
    }
}

fn escalate(err: Error) {
    if config().panic_on_corruption && !std::thread::panicking() {
        panic!("{err}");
    }
}

/// Open a synchronous tracking session.
pub fn begin_session() -> SessionGuard {
    let id = TRACKER.with(|t| t.open(false));
    SessionGuard {
        id,
        closed: false,
        _not_send: PhantomData,
    }
}

/// Run `render` once inside a fresh session.
///
/// Returns the render's value untouched (a `Result` returned by the render is
/// passed through as-is) together with the nodes it read. If `render` panics,
/// the session is still popped, its partial set is kept for
/// [`take_failed_access`], and the panic continues unchanged.
pub fn run_tracked_sync<R>(render: impl FnOnce() -> R) -> Tracked<R> {
    let guard = begin_session();
    let value = render();
    let accessed = guard.finish();
    Tracked { value, accessed }
}

/// Like [`run_tracked_sync`], and additionally attach a fresh deferred session
/// to `position` so callbacks invoked later under that position keep
/// reporting to this render.
///
/// The new session replaces the one previously attached to `position` only
/// once `render` returns. If `render` panics, the previous session stays
/// open, so callbacks built by the last successful render keep reporting.
pub fn run_tracked_with_deferred_context<R>(
    position: &RenderPosition,
    render: impl FnOnce() -> R,
) -> DeferredTracked<R> {
    let Tracked { value, accessed } = position.enter(|| run_tracked_sync(render));
    let deferred = position.open_deferred(TRACKER.with(TrackerState::next_session_id));
    DeferredTracked {
        value,
        accessed,
        deferred,
    }
}

/// Run `f` with access reporting suppressed.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let id = TRACKER.with(|t| t.open(true));
    let guard = SessionGuard {
        id,
        closed: false,
        _not_send: PhantomData,
    };
    let value = f();
    let _ = guard.finish();
    value
}

pub(crate) fn push_position(position: RenderPosition) {
    TRACKER.with(|t| {
        t.positions.borrow_mut().push(position);
        t.engaged.set(t.engaged.get() + 1);
    });
}

/// Pop the innermost entered position; `false` if it was not `expected`.
pub(crate) fn pop_position(expected: &RenderPosition) -> bool {
    TRACKER.with(|t| {
        let mut positions = t.positions.borrow_mut();
        let Some(index) = positions.iter().rposition(|p| p == expected) else {
            return false;
        };
        let in_order = index + 1 == positions.len();
        let removed = positions.len() - index;
        positions.truncate(index);
        drop(positions);
        t.engaged.set(t.engaged.get() - removed);
        in_order
    })
}

pub(crate) fn current_position() -> Option<RenderPosition> {
    TRACKER.with(|t| t.positions.borrow().last().cloned())
}
