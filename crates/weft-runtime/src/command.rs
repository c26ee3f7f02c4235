#![forbid(unsafe_code)]

//! Commands: user actions exposed by view models.
//!
//! A command pairs an action with an optional can-execute predicate and an
//! explicit can-execute-changed channel (a node of kind `Command`). Views
//! subscribe to the channel; view models call
//! [`notify_can_execute_changed`](RelayCommand::notify_can_execute_changed)
//! when the predicate's inputs change. The predicate is never auto-tracked.
//!
//! # Invariants
//!
//! - Actions and predicates run untracked: executing a command inside a render
//!   adds nothing to the render's dependencies.
//! - `try_execute()` returns `Ok(false)` without running the action when the
//!   predicate refuses, and `Err(UseAfterDispose)` once disposed.
//! - An [`AsyncRelayCommand`] reports `can_execute() == false` while a run is
//!   in flight; start and finish both raise can-execute-changed.
//!
//! # Failure Modes
//!
//! - **Action panics**: the panic propagates to the caller. The execution
//!   counter is not bumped. An async run that is dropped or panics mid-flight
//!   still clears `is_executing` and raises can-execute-changed.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::error::Result;
use crate::reactive::node::{Disposable, NodeHandle, NodeKind, ObservableNode};
use crate::reactive::tracker::untracked;

/// Read side of a command, as seen by views.
pub trait Command: ObservableNode {
    /// Whether invoking the command now would run its action.
    fn can_execute(&self) -> bool;

    /// Whether an asynchronous run is in flight.
    fn is_executing(&self) -> bool {
        false
    }

    /// The can-execute-changed channel.
    fn channel(&self) -> &NodeHandle {
        self.node()
    }
}

type Predicate = Box<dyn Fn() -> bool>;

// ---------------------------------------------------------------------------
// RelayCommand
// ---------------------------------------------------------------------------

struct RelayInner {
    channel: NodeHandle,
    action: Box<dyn Fn()>,
    predicate: RefCell<Option<Predicate>>,
    executions: Cell<u64>,
}

/// Synchronous command without a parameter.
#[derive(Clone)]
pub struct RelayCommand {
    inner: Rc<RelayInner>,
}

impl RelayCommand {
    #[must_use]
    pub fn new(action: impl Fn() + 'static) -> Self {
        Self::build(None, action)
    }

    #[must_use]
    pub fn labeled(label: impl Into<Cow<'static, str>>, action: impl Fn() + 'static) -> Self {
        Self::build(Some(label.into()), action)
    }

    fn build(label: Option<Cow<'static, str>>, action: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(RelayInner {
                channel: NodeHandle::new(NodeKind::Command, label),
                action: Box::new(action),
                predicate: RefCell::new(None),
                executions: Cell::new(0),
            }),
        }
    }

    /// Gate execution on `predicate`.
    #[must_use]
    pub fn with_predicate(self, predicate: impl Fn() -> bool + 'static) -> Self {
        *self.inner.predicate.borrow_mut() = Some(Box::new(predicate));
        self
    }

    /// Run the action if allowed. Returns whether it ran.
    pub fn try_execute(&self) -> Result<bool> {
        self.inner.channel.ensure_live()?;
        if !self.can_execute() {
            return Ok(false);
        }
        untracked(|| (self.inner.action)());
        self.inner.executions.set(self.inner.executions.get() + 1);
        Ok(true)
    }

    /// Run the action if allowed. Returns whether it ran.
    ///
    /// # Panics
    ///
    /// If the command was disposed.
    pub fn execute(&self) -> bool {
        match self.try_execute() {
            Ok(ran) => ran,
            Err(err) => panic!("{err}"),
        }
    }

    /// Raise can-execute-changed.
    pub fn try_notify_can_execute_changed(&self) -> Result<()> {
        self.inner.channel.ensure_live()?;
        self.inner.channel.notify();
        Ok(())
    }

    /// Raise can-execute-changed.
    ///
    /// # Panics
    ///
    /// If the command was disposed.
    pub fn notify_can_execute_changed(&self) {
        if let Err(err) = self.try_notify_can_execute_changed() {
            panic!("{err}");
        }
    }

    /// Number of times the action ran to completion.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.inner.executions.get()
    }
}

impl Command for RelayCommand {
    fn can_execute(&self) -> bool {
        if self.inner.channel.is_disposed() {
            return false;
        }
        let predicate = self.inner.predicate.borrow();
        predicate.as_ref().is_none_or(|p| untracked(p))
    }
}

impl ObservableNode for RelayCommand {
    fn node(&self) -> &NodeHandle {
        &self.inner.channel
    }
}

impl Disposable for RelayCommand {
    fn dispose(&self) {
        self.inner.channel.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.channel.is_disposed()
    }
}

impl fmt::Debug for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCommand")
            .field("channel", &self.inner.channel.describe())
            .field("executions", &self.inner.executions.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RelayCommandWith<P>
// ---------------------------------------------------------------------------

struct RelayWithInner<P> {
    channel: NodeHandle,
    action: Box<dyn Fn(&P)>,
    predicate: RefCell<Option<Box<dyn Fn(&P) -> bool>>>,
}

/// Synchronous command taking a parameter.
pub struct RelayCommandWith<P> {
    inner: Rc<RelayWithInner<P>>,
}

impl<P> Clone for RelayCommandWith<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static> RelayCommandWith<P> {
    #[must_use]
    pub fn new(action: impl Fn(&P) + 'static) -> Self {
        Self {
            inner: Rc::new(RelayWithInner {
                channel: NodeHandle::new(NodeKind::Command, None),
                action: Box::new(action),
                predicate: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn with_predicate(self, predicate: impl Fn(&P) -> bool + 'static) -> Self {
        *self.inner.predicate.borrow_mut() = Some(Box::new(predicate));
        self
    }

    /// Whether the action would run for `param`.
    #[must_use]
    pub fn can_execute(&self, param: &P) -> bool {
        if self.inner.channel.is_disposed() {
            return false;
        }
        let predicate = self.inner.predicate.borrow();
        predicate.as_ref().is_none_or(|p| untracked(|| p(param)))
    }

    pub fn try_execute(&self, param: &P) -> Result<bool> {
        self.inner.channel.ensure_live()?;
        if !self.can_execute(param) {
            return Ok(false);
        }
        untracked(|| (self.inner.action)(param));
        Ok(true)
    }

    /// # Panics
    ///
    /// If the command was disposed.
    pub fn execute(&self, param: &P) -> bool {
        match self.try_execute(param) {
            Ok(ran) => ran,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_notify_can_execute_changed(&self) -> Result<()> {
        self.inner.channel.ensure_live()?;
        self.inner.channel.notify();
        Ok(())
    }

    /// # Panics
    ///
    /// If the command was disposed.
    pub fn notify_can_execute_changed(&self) {
        if let Err(err) = self.try_notify_can_execute_changed() {
            panic!("{err}");
        }
    }
}

impl<P> ObservableNode for RelayCommandWith<P> {
    fn node(&self) -> &NodeHandle {
        &self.inner.channel
    }
}

impl<P> Disposable for RelayCommandWith<P> {
    fn dispose(&self) {
        self.inner.channel.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.channel.is_disposed()
    }
}

// ---------------------------------------------------------------------------
// AsyncRelayCommand
// ---------------------------------------------------------------------------

/// Boxed future returned by async command actions.
pub type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;

struct AsyncInner {
    channel: NodeHandle,
    action: Box<dyn Fn() -> LocalBoxFuture>,
    predicate: RefCell<Option<Predicate>>,
    executing: Cell<bool>,
}

/// Command whose action is asynchronous.
///
/// The command does not spawn anything: [`try_execute`](Self::try_execute)
/// returns the run as a future for the host's executor.
#[derive(Clone)]
pub struct AsyncRelayCommand {
    inner: Rc<AsyncInner>,
}

/// Clears the executing flag when a run finishes, is dropped, or unwinds.
struct ExecutingGuard {
    inner: Rc<AsyncInner>,
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.inner.executing.set(false);
        self.inner.channel.notify();
    }
}

impl AsyncRelayCommand {
    #[must_use]
    pub fn new<F>(action: impl Fn() -> F + 'static) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            inner: Rc::new(AsyncInner {
                channel: NodeHandle::new(NodeKind::Command, None),
                action: Box::new(move || Box::pin(action()) as LocalBoxFuture),
                predicate: RefCell::new(None),
                executing: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn with_predicate(self, predicate: impl Fn() -> bool + 'static) -> Self {
        *self.inner.predicate.borrow_mut() = Some(Box::new(predicate));
        self
    }

    /// Start a run.
    ///
    /// Returns `Ok(None)` if the command cannot execute (predicate refused or
    /// a run is already in flight). Otherwise marks the command executing,
    /// raises can-execute-changed, and returns the run.
    pub fn try_execute(&self) -> Result<Option<impl Future<Output = ()> + 'static>> {
        self.inner.channel.ensure_live()?;
        if !self.can_execute() {
            return Ok(None);
        }
        self.inner.executing.set(true);
        let guard = ExecutingGuard {
            inner: Rc::clone(&self.inner),
        };
        self.inner.channel.notify();
        let run = untracked(|| (self.inner.action)());
        Ok(Some(async move {
            run.await;
            drop(guard);
        }))
    }

    pub fn try_notify_can_execute_changed(&self) -> Result<()> {
        self.inner.channel.ensure_live()?;
        self.inner.channel.notify();
        Ok(())
    }

    /// # Panics
    ///
    /// If the command was disposed.
    pub fn notify_can_execute_changed(&self) {
        if let Err(err) = self.try_notify_can_execute_changed() {
            panic!("{err}");
        }
    }
}

impl Command for AsyncRelayCommand {
    fn can_execute(&self) -> bool {
        if self.inner.channel.is_disposed() || self.inner.executing.get() {
            return false;
        }
        let predicate = self.inner.predicate.borrow();
        predicate.as_ref().is_none_or(|p| untracked(p))
    }

    fn is_executing(&self) -> bool {
        self.inner.executing.get()
    }
}

impl ObservableNode for AsyncRelayCommand {
    fn node(&self) -> &NodeHandle {
        &self.inner.channel
    }
}

impl Disposable for AsyncRelayCommand {
    fn dispose(&self) {
        self.inner.channel.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.channel.is_disposed()
    }
}

impl fmt::Debug for AsyncRelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRelayCommand")
            .field("channel", &self.inner.channel.describe())
            .field("executing", &self.inner.executing.get())
            .finish()
    }
}
