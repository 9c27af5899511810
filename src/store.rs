//! Namespace-isolated concurrent collections, one per resource type.
//!
//! Every record is keyed by `(namespace, id)` so concurrent test processes
//! sharing one simulator never observe each other's state. Point reads and
//! lists are snapshot clones that never block writers; check-then-act writes
//! (insert-if-absent) go through the sharded entry API so uniqueness holds
//! without any external locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::VirtualClock;
use crate::error::{SimResult, SimulatorError};

/// Namespace used when no test-scoping token is supplied.
pub const GLOBAL_NAMESPACE: &str = "global";

/// A record that can live in a [`NamespacedStore`].
pub trait Resource: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    /// Stamp `updated_at`; called by the store on every successful update.
    fn touch(&mut self, now: DateTime<Utc>);
}

pub struct NamespacedStore<T: Resource> {
    records: DashMap<(String, String), T>,
    clock: Arc<VirtualClock>,
}

impl<T: Resource> NamespacedStore<T> {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Insert a new record. `Conflict` if the `(namespace, id)` pair is
    /// already taken; the check and the insert are a single atomic step.
    pub fn insert(&self, namespace: &str, record: T) -> SimResult<T> {
        let key = (namespace.to_string(), record.id().to_string());
        match self.records.entry(key) {
            Entry::Occupied(_) => Err(SimulatorError::Conflict(format!(
                "record {} already exists in namespace {}",
                record.id(),
                namespace
            ))),
            Entry::Vacant(slot) => {
                let stored = slot.insert(record);
                Ok(stored.clone())
            }
        }
    }

    /// Snapshot point read.
    pub fn get(&self, namespace: &str, id: &str) -> SimResult<T> {
        self.records
            .get(&(namespace.to_string(), id.to_string()))
            .map(|r| r.clone())
            .ok_or(SimulatorError::NotFound)
    }

    pub fn exists(&self, namespace: &str, id: &str) -> bool {
        self.records
            .contains_key(&(namespace.to_string(), id.to_string()))
    }

    /// Apply a patch under the record's write lock and stamp `updated_at`
    /// from the virtual clock. Returns the updated snapshot.
    pub fn update(&self, namespace: &str, id: &str, patch: impl FnOnce(&mut T)) -> SimResult<T> {
        let mut entry = self
            .records
            .get_mut(&(namespace.to_string(), id.to_string()))
            .ok_or(SimulatorError::NotFound)?;
        patch(entry.value_mut());
        entry.value_mut().touch(self.clock.now());
        Ok(entry.clone())
    }

    pub fn delete(&self, namespace: &str, id: &str) -> SimResult<T> {
        self.records
            .remove(&(namespace.to_string(), id.to_string()))
            .map(|(_, record)| record)
            .ok_or(SimulatorError::NotFound)
    }

    /// All records in a namespace, in creation order. Restartable: each call
    /// takes a fresh snapshot.
    pub fn list(&self, namespace: &str) -> Vec<T> {
        self.list_where(namespace, |_| true)
    }

    pub fn list_where(&self, namespace: &str, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let mut matches: Vec<T> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == namespace && filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        matches
    }

    /// First record matching the filter, if any. Avoids cloning the rest.
    pub fn find(&self, namespace: &str, filter: impl Fn(&T) -> bool) -> Option<T> {
        self.records
            .iter()
            .find(|entry| entry.key().0 == namespace && filter(entry.value()))
            .map(|entry| entry.value().clone())
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .count()
    }

    pub fn clear_namespace(&self, namespace: &str) {
        self.records.retain(|key, _| key.0 != namespace);
    }

    pub fn clear_all(&self) {
        self.records.clear();
    }
}
