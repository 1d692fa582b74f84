//! Bidirectional id ↔ object registry

use std::collections::{BTreeMap, HashMap};

use super::object::{ErasedObject, Interests};
use crate::core::{BridgeError, BridgeResult};

/// Stable handle of a registered object, ordered by registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(u64);

impl ObjectKey {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

pub(crate) struct Entry {
    pub id: String,
    pub type_name: String,
    pub interests: Interests,
    pub object: Box<dyn ErasedObject>,
}

/// The two maps are only mutated together, so every id has exactly one key
/// and every key exactly one id.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<ObjectKey, Entry>,
    by_id: HashMap<String, ObjectKey>,
    by_key: HashMap<ObjectKey, String>,
    next_key: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, entry: Entry) -> BridgeResult<ObjectKey> {
        if self.by_id.contains_key(&entry.id) {
            return Err(BridgeError::DuplicateId(entry.id));
        }
        let key = ObjectKey(self.next_key);
        self.next_key += 1;
        self.by_id.insert(entry.id.clone(), key);
        self.by_key.insert(key, entry.id.clone());
        self.entries.insert(key, entry);
        Ok(key)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Entry> {
        let key = self.by_id.remove(id)?;
        self.by_key.remove(&key);
        self.entries.remove(&key)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Entry> {
        let key = self.by_id.get(id)?;
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Entry> {
        let key = self.by_id.get(id)?;
        self.entries.get_mut(key)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn key_of(&self, id: &str) -> Option<ObjectKey> {
        self.by_id.get(id).copied()
    }

    pub fn id_of(&self, key: ObjectKey) -> Option<&str> {
        self.by_key.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.entries.values().map(|e| e.id.clone()).collect()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.values_mut()
    }

    /// Both maps agree on every entry
    pub fn is_consistent(&self) -> bool {
        self.by_id.len() == self.by_key.len()
            && self.by_id.len() == self.entries.len()
            && self.by_id.iter().all(|(id, key)| {
                self.by_key.get(key) == Some(id)
                    && self.entries.get(key).map(|e| &e.id) == Some(id)
            })
    }
}
