//! Keyed registry of shared resources bound to an owning context.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use tracing::{debug, error, info};

use crate::core::StoreError;

/// Hooks a [`ResourceStore`] drives on its entries.
pub trait StoreEntry<K> {
    /// What the store hands to attach/detach hooks, e.g. a [`TaskQueue`](crate::core::TaskQueue).
    type Context;

    /// Key the entry is registered under.
    fn key(&self) -> K;

    /// The owning context became active.
    fn on_attach(self: &Rc<Self>, context: &Self::Context);

    /// The owning context is going inactive.
    fn on_detach(self: &Rc<Self>, context: &Self::Context);

    /// Teardown before the store forgets the entry.
    fn reset(&self);
}

/// Single source of truth mapping a key to one live entry.
///
/// Entries added while the store is attached get their attach hook
/// immediately; entries removed while attached get their detach hook before
/// `reset`.
pub struct ResourceStore<K, V>
where
    V: StoreEntry<K>,
{
    context: Rc<V::Context>,
    resources: HashMap<K, Rc<V>>,
    attached: bool,
}

impl<K, V> ResourceStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: StoreEntry<K>,
{
    /// Create an empty, detached store for `context`.
    pub fn new(context: Rc<V::Context>) -> Self {
        Self {
            context,
            resources: HashMap::new(),
            attached: false,
        }
    }

    /// The owning context.
    pub fn context(&self) -> &Rc<V::Context> {
        &self.context
    }

    /// Whether an entry is registered under `key`.
    pub fn has(&self, key: &K) -> bool {
        self.resources.contains_key(key)
    }

    /// The entry registered under `key`.
    pub fn get(&self, key: &K) -> Option<Rc<V>> {
        self.resources.get(key).cloned()
    }

    /// Register `entry` under its own key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if the key is taken; the existing
    /// entry is left untouched.
    pub fn add(&mut self, entry: Rc<V>) -> Result<Rc<V>, StoreError> {
        let key = entry.key();
        if self.resources.contains_key(&key) {
            error!(key = ?key, "resource added twice");
            return Err(StoreError::DuplicateKey(format!("{key:?}")));
        }
        debug!(key = ?key, "resource added");
        self.resources.insert(key, Rc::clone(&entry));
        if self.attached {
            entry.on_attach(&self.context);
        }
        Ok(entry)
    }

    /// Return the entry under `key`, creating and adding it with `make` if absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyMismatch` if `make` builds an entry whose own
    /// key differs from `key`; nothing is stored.
    pub fn get_or_insert_with<F>(&mut self, key: &K, make: F) -> Result<Rc<V>, StoreError>
    where
        F: FnOnce(&K) -> Rc<V>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let entry = make(key);
        let actual = entry.key();
        if &actual != key {
            error!(expected = ?key, actual = ?actual, "factory built an entry for another key");
            return Err(StoreError::KeyMismatch {
                expected: format!("{key:?}"),
                actual: format!("{actual:?}"),
            });
        }
        debug!(key = ?key, "resource created on lookup");
        self.resources.insert(actual, Rc::clone(&entry));
        if self.attached {
            entry.on_attach(&self.context);
        }
        Ok(entry)
    }

    /// Tear down and forget the entry under `key`. Absent keys are a no-op.
    pub fn remove(&mut self, key: &K) -> Option<Rc<V>> {
        let entry = self.resources.remove(key)?;
        if self.attached {
            entry.on_detach(&self.context);
        }
        entry.reset();
        debug!(key = ?key, "resource removed");
        Some(entry)
    }

    /// Activate the store and run every entry's attach hook.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyAttached` without side effects if the
    /// store is already attached.
    pub fn attach(&mut self) -> Result<(), StoreError> {
        if self.attached {
            error!("store attached twice without detach");
            return Err(StoreError::AlreadyAttached);
        }
        self.attached = true;
        for entry in self.snapshot() {
            entry.on_attach(&self.context);
        }
        info!(resources = self.resources.len(), "resource store attached");
        Ok(())
    }

    /// Run every entry's detach hook and deactivate the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotAttached` if the store is not attached.
    pub fn detach(&mut self) -> Result<(), StoreError> {
        if !self.attached {
            error!("store detached while not attached");
            return Err(StoreError::NotAttached);
        }
        for entry in self.snapshot() {
            entry.on_detach(&self.context);
        }
        self.attached = false;
        info!(resources = self.resources.len(), "resource store detached");
        Ok(())
    }

    /// Whether the owning context is active.
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Visit every entry. Order is unspecified.
    pub fn for_each<F>(&self, mut callback: F)
    where
        F: FnMut(&K, &Rc<V>),
    {
        for (key, entry) in &self.resources {
            callback(key, entry);
        }
    }

    /// Registered keys, in unspecified order.
    pub fn keys(&self) -> Vec<K> {
        self.resources.keys().cloned().collect()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn snapshot(&self) -> Vec<Rc<V>> {
        self.resources.values().cloned().collect()
    }
}

impl<K, V> Drop for ResourceStore<K, V>
where
    V: StoreEntry<K>,
{
    fn drop(&mut self) {
        if self.attached {
            for entry in self.resources.values() {
                entry.on_detach(&self.context);
            }
            self.attached = false;
        }
    }
}
