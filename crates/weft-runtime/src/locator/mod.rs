#![forbid(unsafe_code)]

//! Type-keyed service location for view models.
//!
//! Two registries cooperate:
//!
//! - [`GlobalRegistry`]: one per UI thread, for application-wide services.
//! - [`ScopeRegistry`]: a tree of scopes (one per screen, dialog, list item,
//!   ...). Resolution is nearest-wins: the scope itself, then its ancestors
//!   outward, then the global registry.
//!
//! Instances built with [`ScopeRegistry::create`] are owned by the scope and
//! disposed with it. Instances handed in with [`ScopeRegistry::provide`] are
//! only referenced. A [`Resolver`] gives a constructor access to the scope
//! while it runs, and only then.

mod global;
mod resolver;
mod scope;

pub use global::GlobalRegistry;
pub use resolver::Resolver;
pub use scope::{DisposalOrder, ScopeConfig, ScopeRegistry};

use std::any::{Any, TypeId};
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::{Error, Result};
use crate::reactive::Disposable;

struct Entry {
    value: Rc<dyn Any>,
    /// Present iff the registry owns the instance.
    disposer: Option<Rc<dyn Disposable>>,
    type_name: &'static str,
}

/// An owned instance removed from a registry, awaiting disposal.
pub(crate) struct Owned {
    pub(crate) type_name: &'static str,
    pub(crate) resource: Rc<dyn Disposable>,
}

/// Storage shared by both registry kinds.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    entries: AHashMap<TypeId, Entry>,
    /// Insertion order, for ordered disposal.
    order: Vec<TypeId>,
}

impl TypeRegistry {
    pub(crate) fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get<T: Any>(&self) -> Option<Rc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Rc::clone(&entry.value).downcast::<T>().ok())
    }

    pub(crate) fn insert_shared<T: Any>(&mut self, value: Rc<T>, registry: &str) -> Result<()> {
        self.insert(value, None, registry)
    }

    pub(crate) fn insert_owned<T: Any + Disposable>(
        &mut self,
        value: Rc<T>,
        registry: &str,
    ) -> Result<()> {
        let disposer: Rc<dyn Disposable> = value.clone();
        self.insert(value, Some(disposer), registry)
    }

    fn insert<T: Any>(
        &mut self,
        value: Rc<T>,
        disposer: Option<Rc<dyn Disposable>>,
        registry: &str,
    ) -> Result<()> {
        let type_name = std::any::type_name::<T>();
        if self.contains::<T>() {
            return Err(duplicate::<T>(registry));
        }
        let key = TypeId::of::<T>();
        self.entries.insert(
            key,
            Entry {
                value,
                disposer,
                type_name,
            },
        );
        self.order.push(key);
        Ok(())
    }

    /// Remove `T`. `Some(Some(owned))` if the entry was owned.
    pub(crate) fn remove<T: Any>(&mut self) -> Option<Option<Owned>> {
        let key = TypeId::of::<T>();
        let entry = self.entries.remove(&key)?;
        self.order.retain(|k| *k != key);
        Some(entry.disposer.map(|resource| Owned {
            type_name: entry.type_name,
            resource,
        }))
    }

    /// Empty the registry, returning owned instances in insertion order.
    pub(crate) fn drain_owned(&mut self) -> Vec<Owned> {
        let order = std::mem::take(&mut self.order);
        let mut entries = std::mem::take(&mut self.entries);
        order
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .filter_map(|entry| {
                entry.disposer.map(|resource| Owned {
                    type_name: entry.type_name,
                    resource,
                })
            })
            .collect()
    }
}

pub(crate) fn duplicate<T: Any>(registry: &str) -> Error {
    Error::DuplicateRegistration {
        type_name: std::any::type_name::<T>(),
        registry: registry.to_string(),
    }
}
