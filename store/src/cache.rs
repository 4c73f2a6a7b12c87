//! Typed copy-on-write caches over a [`ReadView`] of the store.
//!
//! A [`DataCache`] stages changes to one entity family (one key prefix) in
//! memory. Reads check the overlay first and fall through to the view;
//! deletions of stored keys are kept as tombstones so they shadow the store
//! until commit. Nothing reaches the store until the owning snapshot writes
//! the staged changes as part of a single batch.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Prefix, ReadView, StoreError, StoreKey, WriteBatch};

/// How an overlay entry differs from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Not present in the store.
    Added,
    /// Present in the store with a different value.
    Changed,
    /// Present in the store, removed here.
    Deleted,
}

struct Trackable<K, V> {
    key: K,
    item: Option<V>,
    state: TrackState,
}

pub struct DataCache<K, V> {
    prefix: Prefix,
    view: Arc<dyn ReadView>,
    dictionary: BTreeMap<Vec<u8>, Trackable<K, V>>,
}

impl<K, V> DataCache<K, V>
where
    K: StoreKey + fmt::Debug,
    V: Clone + Serialize + DeserializeOwned,
{
    pub fn new(view: Arc<dyn ReadView>, prefix: Prefix) -> Self {
        Self {
            prefix,
            view,
            dictionary: BTreeMap::new(),
        }
    }

    /// Read through `view` from now on. The overlay is kept.
    pub fn rebind(&mut self, view: Arc<dyn ReadView>) {
        self.view = view;
    }

    fn load(&self, id: &[u8]) -> Result<Option<V>, StoreError> {
        match self.view.get(&self.prefix.key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Value for `key`, or `None` if absent from both overlay and store.
    pub fn try_get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let id = key.encode();
        match self.dictionary.get(&id) {
            Some(t) => Ok(t.item.clone()),
            None => self.load(&id),
        }
    }

    /// Value for `key`; `NotFound` if absent.
    pub fn get(&self, key: &K) -> Result<V, StoreError> {
        self.try_get(key)?
            .ok_or_else(|| StoreError::NotFound(format!("{:?} {:?}", self.prefix, key)))
    }

    pub fn contains(&self, key: &K) -> Result<bool, StoreError> {
        let id = key.encode();
        match self.dictionary.get(&id) {
            Some(t) => Ok(t.state != TrackState::Deleted),
            None => Ok(self.view.get(&self.prefix.key(&id))?.is_some()),
        }
    }

    /// Insert a new entry; `Duplicate` if the key already exists.
    pub fn add(&mut self, key: K, value: V) -> Result<(), StoreError> {
        let id = key.encode();
        let state = match self.dictionary.get(&id) {
            Some(t) if t.state == TrackState::Deleted => TrackState::Changed,
            Some(_) => {
                return Err(StoreError::Duplicate(format!("{:?} {:?}", self.prefix, key)));
            }
            None => {
                if self.view.get(&self.prefix.key(&id))?.is_some() {
                    return Err(StoreError::Duplicate(format!("{:?} {:?}", self.prefix, key)));
                }
                TrackState::Added
            }
        };
        self.dictionary.insert(
            id,
            Trackable {
                key,
                item: Some(value),
                state,
            },
        );
        Ok(())
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &K) -> Result<(), StoreError> {
        let id = key.encode();
        let cached = self.dictionary.get(&id).map(|t| t.state);
        match cached {
            Some(TrackState::Added) => {
                self.dictionary.remove(&id);
            }
            Some(_) => {
                if let Some(t) = self.dictionary.get_mut(&id) {
                    t.state = TrackState::Deleted;
                    t.item = None;
                }
            }
            None => {
                if self.view.get(&self.prefix.key(&id))?.is_some() {
                    self.dictionary.insert(
                        id,
                        Trackable {
                            key: key.clone(),
                            item: None,
                            state: TrackState::Deleted,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Mutable access to an existing entry, materialized in the overlay.
    pub fn get_and_change(&mut self, key: &K) -> Result<&mut V, StoreError> {
        self.change_entry(key, None::<fn() -> V>)
    }

    /// Mutable access to an entry, creating it from `factory` if absent.
    pub fn get_and_change_or<F: FnOnce() -> V>(
        &mut self,
        key: &K,
        factory: F,
    ) -> Result<&mut V, StoreError> {
        self.change_entry(key, Some(factory))
    }

    fn change_entry<F: FnOnce() -> V>(
        &mut self,
        key: &K,
        factory: Option<F>,
    ) -> Result<&mut V, StoreError> {
        let id = key.encode();
        let not_found = || StoreError::NotFound(format!("{:?} {:?}", self.prefix, key));

        let cached = self
            .dictionary
            .get(&id)
            .map(|t| t.state == TrackState::Deleted);
        let tombstoned = match cached {
            Some(deleted) => deleted,
            None => {
                let (item, state) = match self.load(&id)? {
                    Some(value) => (value, TrackState::Changed),
                    None => (factory.ok_or_else(not_found)?(), TrackState::Added),
                };
                self.dictionary.insert(
                    id.clone(),
                    Trackable {
                        key: key.clone(),
                        item: Some(item),
                        state,
                    },
                );
                return self.slot(&id);
            }
        };

        if tombstoned {
            let value = factory.ok_or_else(not_found)?();
            if let Some(t) = self.dictionary.get_mut(&id) {
                t.item = Some(value);
                t.state = TrackState::Changed;
            }
        }
        self.slot(&id)
    }

    fn slot(&mut self, id: &[u8]) -> Result<&mut V, StoreError> {
        let prefix = self.prefix;
        self.dictionary
            .get_mut(id)
            .and_then(|t| t.item.as_mut())
            .ok_or_else(|| StoreError::Corruption(format!("{prefix:?} overlay slot vanished")))
    }

    /// Every entry whose encoded key starts with `prefix`, merged from the
    /// overlay and the store, in ascending key order. Overlay entries shadow
    /// stored ones; tombstoned keys are excluded.
    pub fn find(&self, prefix: &[u8]) -> Result<Vec<(K, V)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, (K, V)> = BTreeMap::new();

        for (full_key, bytes) in self.view.find(&self.prefix.key(prefix))? {
            let id = &full_key[1..];
            if self.dictionary.contains_key(id) {
                continue;
            }
            let key = K::decode(id)?;
            let value: V = bincode::deserialize(&bytes)?;
            merged.insert(id.to_vec(), (key, value));
        }

        for (id, t) in self.dictionary.range(prefix.to_vec()..) {
            if !id.starts_with(prefix) {
                break;
            }
            if let Some(item) = &t.item {
                merged.insert(id.clone(), (t.key.clone(), item.clone()));
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Staged changes, in key order.
    pub fn changes(&self) -> impl Iterator<Item = (&K, Option<&V>, TrackState)> {
        self.dictionary
            .values()
            .map(|t| (&t.key, t.item.as_ref(), t.state))
    }

    /// Append the staged changes to `batch`.
    pub fn write_into(&self, batch: &mut WriteBatch) -> Result<(), StoreError> {
        for (id, t) in &self.dictionary {
            match (&t.state, &t.item) {
                (TrackState::Deleted, _) => batch.delete(self.prefix.key(id)),
                (_, Some(item)) => batch.put(self.prefix.key(id), bincode::serialize(item)?),
                (_, None) => {}
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.dictionary.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.dictionary.is_empty()
    }
}

/// A single-value cache stored under a bare prefix key (chain tip pointers).
pub struct MetaCache<V> {
    prefix: Prefix,
    view: Arc<dyn ReadView>,
    staged: Option<V>,
}

impl<V> MetaCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub fn new(view: Arc<dyn ReadView>, prefix: Prefix) -> Self {
        Self {
            prefix,
            view,
            staged: None,
        }
    }

    pub fn rebind(&mut self, view: Arc<dyn ReadView>) {
        self.view = view;
    }

    pub fn try_get(&self) -> Result<Option<V>, StoreError> {
        if let Some(value) = &self.staged {
            return Ok(Some(value.clone()));
        }
        match self.view.get(&[self.prefix.byte()])? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_and_change_or<F: FnOnce() -> V>(&mut self, factory: F) -> Result<&mut V, StoreError> {
        if self.staged.is_none() {
            let current = match self.try_get()? {
                Some(value) => value,
                None => factory(),
            };
            self.staged = Some(current);
        }
        let prefix = self.prefix;
        self.staged
            .as_mut()
            .ok_or_else(|| StoreError::Corruption(format!("{prefix:?} staged value vanished")))
    }

    pub fn put(&mut self, value: V) {
        self.staged = Some(value);
    }

    pub fn write_into(&self, batch: &mut WriteBatch) -> Result<(), StoreError> {
        if let Some(value) = &self.staged {
            batch.put(vec![self.prefix.byte()], bincode::serialize(value)?);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.staged = None;
    }
}
