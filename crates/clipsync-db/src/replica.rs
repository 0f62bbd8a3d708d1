//! Replica Store - the local, ordered mirror of the remote collection.
//!
//! Items are unique by id and kept newest first by `created_at`. Ties are
//! broken by id so the order is total and the same on every replica.
//!
//! The store is a plain data structure: it never blocks, never talks to the
//! network and never invents ids. Writers are expected to be the reconciler
//! alone.

use crate::item::{Item, ItemId};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Position of an item in the collection order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    created_at: Reverse<DateTime<Utc>>,
    id: Reverse<ItemId>,
}

impl OrderKey {
    fn of(item: &Item) -> Self {
        Self {
            created_at: Reverse(item.created_at),
            id: Reverse(item.id.clone()),
        }
    }
}

/// What an [`ReplicaStore::upsert`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// The id was new.
    Inserted,
    /// The id existed with different content or timestamp.
    Replaced,
    /// The id existed with identical state.
    Unchanged,
}

impl Upsert {
    pub fn changed(self) -> bool {
        !matches!(self, Upsert::Unchanged)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReplicaStore {
    /// Items in collection order.
    items: BTreeMap<OrderKey, Item>,
    /// Order key of every id present.
    index: HashMap<ItemId, OrderKey>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id. Applying the same item twice is a no-op.
    pub fn upsert(&mut self, item: Item) -> Upsert {
        let key = OrderKey::of(&item);
        match self.index.get(&item.id) {
            Some(existing) if *existing == key => match self.items.get_mut(&key) {
                Some(slot) if *slot == item => Upsert::Unchanged,
                Some(slot) => {
                    *slot = item;
                    Upsert::Replaced
                }
                None => {
                    self.items.insert(key, item);
                    Upsert::Replaced
                }
            },
            Some(existing) => {
                // Timestamps are immutable upstream; if a snapshot disagrees, it wins.
                let stale = existing.clone();
                self.items.remove(&stale);
                self.index.insert(item.id.clone(), key.clone());
                self.items.insert(key, item);
                Upsert::Replaced
            }
            None => {
                self.index.insert(item.id.clone(), key.clone());
                self.items.insert(key, item);
                Upsert::Inserted
            }
        }
    }

    /// Remove by id. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &ItemId) -> Option<Item> {
        let key = self.index.remove(id)?;
        self.items.remove(&key)
    }

    /// Replace the whole collection, e.g. with a fresh remote snapshot.
    /// Duplicate ids in the input collapse to the last one.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = Item>) {
        self.items.clear();
        self.index.clear();
        for item in items {
            self.upsert(item);
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.index.get(id).and_then(|key| self.items.get(key))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    /// Owned snapshot in collection order (newest first).
    pub fn all(&self) -> Vec<Item> {
        self.items.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> + '_ {
        self.items.values()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.values().map(|item| item.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
