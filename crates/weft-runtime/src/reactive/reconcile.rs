#![forbid(unsafe_code)]

//! Subscription reconciliation.
//!
//! After every render, a wrapper hands the render's [`AccessSet`] to its
//! [`SubscriptionSet`], which subscribes to the newly read nodes, drops the
//! subscriptions to nodes the render no longer reads, and keeps the rest
//! untouched. Retained subscriptions are never re-registered, so listener
//! order on shared nodes is stable across renders.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::debug;

use super::node::{NodeHandle, NodeId, Subscription};
use super::tracker::AccessSet;

/// Outcome of one [`SubscriptionSet::reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Newly subscribed nodes, ascending.
    pub added: Vec<NodeId>,
    /// Unsubscribed nodes, ascending.
    pub removed: Vec<NodeId>,
    /// Subscriptions left in place.
    pub retained: usize,
}

impl ReconcileReport {
    /// True when the subscription set did not change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The subscriptions one render wrapper currently holds.
pub struct SubscriptionSet {
    subscriptions: AHashMap<NodeId, Subscription>,
    on_change: Rc<dyn Fn()>,
}

impl SubscriptionSet {
    /// Subscriptions created by this set invoke `on_change`.
    pub fn new(on_change: impl Fn() + 'static) -> Self {
        Self {
            subscriptions: AHashMap::new(),
            on_change: Rc::new(on_change),
        }
    }

    fn subscribe(&self, node: &NodeHandle) -> Option<Subscription> {
        let callback = Rc::clone(&self.on_change);
        // A node disposed during the render cannot be observed any more.
        node.add_listener(move || callback()).ok()
    }

    /// Make the set equal to `accessed`.
    pub fn reconcile(&mut self, accessed: &AccessSet) -> ReconcileReport {
        let mut removed: Vec<NodeId> = self
            .subscriptions
            .keys()
            .filter(|id| !accessed.contains_id(**id))
            .copied()
            .collect();
        for id in &removed {
            if let Some(sub) = self.subscriptions.remove(id) {
                sub.unsubscribe();
            }
        }

        let mut added = Vec::new();
        for node in accessed.iter() {
            if self.subscriptions.contains_key(&node.id()) {
                continue;
            }
            if let Some(sub) = self.subscribe(node) {
                self.subscriptions.insert(node.id(), sub);
                added.push(node.id());
            }
        }

        added.sort_unstable();
        removed.sort_unstable();
        let report = ReconcileReport {
            retained: self.subscriptions.len() - added.len(),
            added,
            removed,
        };
        if !report.is_unchanged() {
            debug!(
                added = report.added.len(),
                removed = report.removed.len(),
                retained = report.retained,
                "subscriptions reconciled"
            );
        }
        report
    }

    /// Subscribe to one more node without touching the others.
    ///
    /// Returns `false` if the node was already subscribed or is disposed.
    pub fn extend(&mut self, node: &NodeHandle) -> bool {
        if self.subscriptions.contains_key(&node.id()) {
            return false;
        }
        match self.subscribe(node) {
            Some(sub) => {
                self.subscriptions.insert(node.id(), sub);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Subscribed node ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.subscriptions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("ids", &self.ids())
            .finish_non_exhaustive()
    }
}
