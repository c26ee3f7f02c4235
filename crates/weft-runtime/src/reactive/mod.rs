#![forbid(unsafe_code)]

//! Reactive state for weft.
//!
//! This module provides the observable graph and the dependency tracker:
//!
//! - [`Observable`]: a shared, version-tracked value with change notification.
//! - [`Computed`]: a lazily-evaluated, memoized value over an explicit
//!   dependency list.
//! - [`ObservableObject`]: an owner of properties, computeds, commands and
//!   nested objects, with object-level change notification.
//! - [`Subscription`]: RAII listener registration; unsubscribes on drop.
//! - [`tracker`]: per-thread tracking sessions recording which nodes a render
//!   read.
//! - [`SubscriptionSet`]: reconciles a render's reads against the
//!   subscriptions the render wrapper holds.
//!
//! # Architecture
//!
//! Everything is single-threaded: nodes share state through `Rc` and
//! `RefCell`, and the tracker lives in a thread-local. Back-pointers from
//! listeners to their owners are `Weak`, so dropping the last handle to a
//! node releases it even while subscriptions to it are still alive.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per write that changes the value.
//! 2. Listeners are notified in registration order, synchronously, before the
//!    write returns.
//! 3. A read with no tracking session and no entered render position costs one
//!    thread-local counter test on top of the read itself.
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification.
//! 5. `Computed::get()` never returns a stale value.

pub mod computed;
pub mod node;
pub mod object;
pub mod observable;
pub mod position;
pub mod reconcile;
pub mod tracker;

pub use computed::Computed;
pub use node::{Disposable, NodeHandle, NodeId, NodeKind, ObservableNode, Subscription};
pub use object::ObservableObject;
pub use observable::{Equality, Observable};
pub use position::{DeferredHandle, RenderPosition};
pub use reconcile::{ReconcileReport, SubscriptionSet};
pub use tracker::{
    AccessSet, DeferredTracked, SessionGuard, SessionId, Tracked, TrackerConfig,
    run_tracked_sync, run_tracked_with_deferred_context, untracked,
};
