#![forbid(unsafe_code)]

//! Observable objects: owners of properties, computeds, commands and nested
//! objects.
//!
//! An [`ObservableObject`] is the unit a view model is built from. Everything
//! created through it is owned by it and disposed with it, exactly once, in
//! reverse creation order. The object's own node fires once whenever a
//! directly owned property or computed changes, which is what whole-object
//! ("observe everything") bindings subscribe to. An owned computed whose
//! dependencies all belong to the object is not relayed separately: the
//! property write that dirties it already fired the object.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use tracing::debug;

use super::computed::Computed;
use super::node::{Disposable, NodeHandle, NodeId, NodeKind, ObservableNode, Subscription};
use super::observable::{Equality, Observable};
use crate::command::RelayCommand;
use crate::error::Result;

struct ObjectInner {
    node: NodeHandle,
    owned: RefCell<Vec<Rc<dyn Disposable>>>,
    /// Child-change relays into `node`.
    relays: RefCell<Vec<Subscription>>,
    /// Owned nodes whose changes already reach `node`.
    covered: RefCell<AHashSet<NodeId>>,
}

/// Owner of a group of reactive values.
///
/// Cloning shares the same object.
#[derive(Clone)]
pub struct ObservableObject {
    inner: Rc<ObjectInner>,
}

impl Default for ObservableObject {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableObject {
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    #[must_use]
    pub fn labeled(label: impl Into<Cow<'static, str>>) -> Self {
        Self::build(Some(label.into()))
    }

    fn build(label: Option<Cow<'static, str>>) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                node: NodeHandle::new(NodeKind::Object, label),
                owned: RefCell::new(Vec::new()),
                relays: RefCell::new(Vec::new()),
                covered: RefCell::new(AHashSet::new()),
            }),
        }
    }

    fn weak(&self) -> Weak<ObjectInner> {
        Rc::downgrade(&self.inner)
    }

    /// Forward change notifications of `child` to this object's node.
    fn relay(&self, child: &NodeHandle) -> Result<()> {
        let weak = self.weak();
        let sub = child.add_listener(move || {
            if let Some(inner) = weak.upgrade() {
                inner.node.notify();
            }
        })?;
        self.inner.relays.borrow_mut().push(sub);
        self.inner.covered.borrow_mut().insert(child.id());
        Ok(())
    }

    fn push_owned(&self, resource: Rc<dyn Disposable>) {
        self.inner.owned.borrow_mut().push(resource);
    }

    /// Create an owned property.
    pub fn try_property<T: PartialEq + 'static>(&self, value: T) -> Result<Observable<T>> {
        self.property_with(None::<&'static str>, value, Equality::by_value())
    }

    /// Create an owned property.
    ///
    /// # Panics
    ///
    /// If the object was disposed.
    pub fn property<T: PartialEq + 'static>(&self, value: T) -> Observable<T> {
        match self.try_property(value) {
            Ok(p) => p,
            Err(err) => panic!("{err}"),
        }
    }

    /// Create an owned, labeled property.
    pub fn property_labeled<T: PartialEq + 'static>(
        &self,
        label: impl Into<Cow<'static, str>>,
        value: T,
    ) -> Result<Observable<T>> {
        self.property_with(Some(label), value, Equality::by_value())
    }

    /// Create an owned property with an explicit equality policy.
    pub fn property_with<T: 'static, L: Into<Cow<'static, str>>>(
        &self,
        label: Option<L>,
        value: T,
        equality: Equality<T>,
    ) -> Result<Observable<T>> {
        self.inner.node.ensure_live()?;
        let property = Observable::build(label.map(Into::into), value, equality);
        self.relay(property.node())?;
        self.push_owned(Rc::new(property.clone()));
        Ok(property)
    }

    /// Create an owned computed value.
    ///
    /// If every dependency is owned by this object, the computed is not
    /// relayed, so [`Computed::invalidate`] on it does not fire the object.
    pub fn computed<T: 'static>(
        &self,
        dependencies: &[&dyn ObservableNode],
        compute: impl Fn() -> T + 'static,
    ) -> Result<Computed<T>> {
        self.inner.node.ensure_live()?;
        let computed = Computed::build(None, dependencies, compute)?;
        let covered = !dependencies.is_empty() && {
            let set = self.inner.covered.borrow();
            dependencies.iter().all(|dep| set.contains(&dep.id()))
        };
        if covered {
            self.inner.covered.borrow_mut().insert(computed.id());
        } else {
            self.relay(computed.node())?;
        }
        self.push_owned(Rc::new(computed.clone()));
        Ok(computed)
    }

    /// Create an owned command.
    pub fn command(&self, action: impl Fn() + 'static) -> Result<RelayCommand> {
        self.own(RelayCommand::new(action))
    }

    /// Create an owned nested object.
    ///
    /// Changes inside the child do not fire this object's listeners.
    pub fn child(&self) -> Result<ObservableObject> {
        self.own(ObservableObject::new())
    }

    /// Take ownership of `resource`, returning it.
    pub fn own<D: Disposable + Clone + 'static>(&self, resource: D) -> Result<D> {
        self.inner.node.ensure_live()?;
        self.push_owned(Rc::new(resource.clone()));
        Ok(resource)
    }

    /// Take ownership of an already shared resource.
    pub fn adopt(&self, resource: Rc<dyn Disposable>) -> Result<()> {
        self.inner.node.ensure_live()?;
        self.push_owned(resource);
        Ok(())
    }

    /// Report the object node to the active tracking session.
    pub fn track(&self) {
        self.inner.node.track();
    }

    /// Number of resources owned (not yet disposed with the object).
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.inner.owned.borrow().len()
    }
}

impl ObservableNode for ObservableObject {
    fn node(&self) -> &NodeHandle {
        &self.inner.node
    }
}

impl Disposable for ObservableObject {
    fn dispose(&self) {
        if self.inner.node.is_disposed() {
            return;
        }
        let owned = std::mem::take(&mut *self.inner.owned.borrow_mut());
        debug!(
            object = %self.inner.node.describe(),
            owned = owned.len(),
            "disposing observable object"
        );
        for resource in owned.iter().rev() {
            resource.dispose();
        }
        self.inner.relays.borrow_mut().clear();
        self.inner.covered.borrow_mut().clear();
        self.inner.node.mark_disposed();
    }

    fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }
}

impl fmt::Debug for ObservableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableObject")
            .field("node", &self.inner.node.describe())
            .field("owned", &self.owned_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::tracker::run_tracked_sync;
    use std::cell::Cell;

    struct Resource {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        disposed: Cell<bool>,
    }

    impl Disposable for Resource {
        fn dispose(&self) {
            if !self.disposed.replace(true) {
                self.log.borrow_mut().push(self.name);
            }
        }

        fn is_disposed(&self) -> bool {
            self.disposed.get()
        }
    }

    fn resource(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Resource> {
        Rc::new(Resource {
            name,
            log: Rc::clone(log),
            disposed: Cell::new(false),
        })
    }

    #[test]
    fn object_listener_fires_for_owned_changes() {
        let vm = ObservableObject::labeled("vm");
        let name = vm.property(String::from("a"));
        let age = vm.property(1);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = vm.add_listener(move || h.set(h.get() + 1)).unwrap();

        name.set("b".into());
        age.set(2);
        age.set(2);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn owned_computed_over_owned_property_fires_once() {
        let vm = ObservableObject::new();
        let a = vm.property(1);
        let a2 = a.clone();
        let doubled = vm.computed(&[&a], move || a2.get() * 2).unwrap();
        let d2 = doubled.clone();
        let quadrupled = vm.computed(&[&doubled], move || d2.get() * 2).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = vm.add_listener(move || h.set(h.get() + 1)).unwrap();

        a.set(5);
        assert_eq!(hits.get(), 1);
        assert_eq!(doubled.get(), 10);
        assert_eq!(quadrupled.get(), 20);
        a.set(6);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn owned_computed_over_outside_node_relays() {
        let vm = ObservableObject::new();
        let outside = Observable::new(1);
        let o = outside.clone();
        let mirrored = vm.computed(&[&outside], move || o.get()).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = vm.add_listener(move || h.set(h.get() + 1)).unwrap();

        outside.set(2);
        assert_eq!(hits.get(), 1);
        assert_eq!(mirrored.get(), 2);
    }

    #[test]
    fn child_changes_do_not_bubble() {
        let vm = ObservableObject::new();
        let child = vm.child().unwrap();
        let inner = child.property(0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = vm.add_listener(move || h.set(h.get() + 1)).unwrap();
        inner.set(1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn dispose_is_lifo_and_exactly_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let vm = ObservableObject::new();
        vm.adopt(resource("first", &log)).unwrap();
        vm.adopt(resource("second", &log)).unwrap();
        vm.adopt(resource("third", &log)).unwrap();

        vm.dispose();
        vm.dispose();
        assert_eq!(*log.borrow(), vec!["third", "second", "first"]);
        assert_eq!(vm.owned_count(), 0);
    }

    #[test]
    fn dispose_cascades_to_nodes() {
        let vm = ObservableObject::new();
        let count = vm.property(0);
        let c2 = count.clone();
        let label = vm.computed(&[&count], move || c2.get().to_string()).unwrap();
        let cmd = vm.command(|| {}).unwrap();
        let child = vm.child().unwrap();
        let grandchild_prop = child.property(1);

        vm.dispose();
        assert!(count.is_disposed());
        assert!(label.is_disposed());
        assert!(cmd.is_disposed());
        assert!(child.is_disposed());
        assert!(grandchild_prop.is_disposed());
        assert!(count.try_get().unwrap_err().is_use_after_dispose());
    }

    #[test]
    fn disposed_object_rejects_children_and_listeners() {
        let vm = ObservableObject::new();
        vm.dispose();
        assert!(vm.try_property(1).unwrap_err().is_use_after_dispose());
        assert!(vm.child().unwrap_err().is_use_after_dispose());
        assert!(vm.add_listener(|| {}).unwrap_err().is_use_after_dispose());
    }

    #[test]
    fn track_reports_object_node() {
        let vm = ObservableObject::new();
        let tracked = run_tracked_sync(|| vm.track());
        assert_eq!(tracked.accessed.ids(), vec![vm.id()]);
    }

    #[test]
    fn property_with_custom_equality() {
        let vm = ObservableObject::new();
        let p = vm
            .property_with(Some("ticks"), 0u32, Equality::never())
            .unwrap();
        assert!(p.try_set(0).unwrap());
        assert_eq!(p.node().label(), Some("ticks"));
    }
}
