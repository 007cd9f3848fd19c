//! Open-addressed hash table keyed by interned strings.
//!
//! Linear probing, tombstone deletion, resize at 0.75 load. Keys are
//! `ObjRef` handles; because strings are interned, key comparison is handle
//! identity. The hash lives on the string object, so operations that need it
//! take the heap's object slice alongside the key.

use super::memory::grow_capacity;
use super::object::{Obj, ObjRef};
use super::value::Value;

const MAX_LOAD: f64 = 0.75;

/// One slot. Three states: empty (`key` absent, value `Nil`), tombstone
/// (`key` absent, value `Bool(true)`), occupied.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub key: Option<ObjRef>,
    pub value: Value,
}

const EMPTY: Entry = Entry {
    key: None,
    value: Value::Nil,
};

#[derive(Debug, Default)]
pub struct Table {
    entries: Vec<Entry>,
    // Occupied slots plus tombstones. Deliberately never decremented on
    // delete, so a table full of tombstones still triggers a resize.
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    /// Live entries plus tombstones.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Look up `key`. A miss is `None`; tombstones keep the probe going.
    pub fn get(&self, objects: &[Obj], key: ObjRef) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[self.find_entry(objects, key)];
        entry.key.map(|_| entry.value)
    }

    /// Insert or overwrite. Returns true when `key` was not present before.
    pub fn set(&mut self, objects: &[Obj], key: ObjRef, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let capacity = grow_capacity(self.entries.len());
            self.adjust_capacity(objects, capacity);
        }

        let index = self.find_entry(objects, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        // Reusing a tombstone does not change the count; it was never
        // subtracted when the tombstone was made.
        if is_new_key && entry.value == Value::Nil {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    /// Remove `key`, leaving a tombstone so later probes still walk past
    /// this slot. Returns false if the key was absent.
    pub fn delete(&mut self, objects: &[Obj], key: ObjRef) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = self.find_entry(objects, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Copy every live entry of `from` into `self`.
    pub fn add_all(&mut self, objects: &[Obj], from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(objects, key, entry.value);
            }
        }
    }

    /// Intern-set lookup: find a stored string equal to `chars` by length,
    /// hash, and content. This is the one place keys are compared by bytes
    /// rather than identity, because the candidate is not interned yet.
    pub fn find_string(&self, objects: &[Obj], chars: &str, hash: u32) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.value == Value::Nil {
                        return None;
                    }
                }
                Some(key) => {
                    if let Obj::Str(s) = &objects[key.index()] {
                        if s.chars.len() == chars.len() && s.hash == hash && &*s.chars == chars {
                            return Some(key);
                        }
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn find_entry(&self, objects: &[Obj], key: ObjRef) -> usize {
        let capacity = self.entries.len();
        let mut index = key_hash(objects, key) as usize % capacity;
        let mut tombstone = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.value == Value::Nil {
                        return tombstone.unwrap_or(index);
                    }
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, objects: &[Obj], capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![EMPTY; capacity]);
        // Rehash only live entries; tombstones are dropped here, so the
        // count resets to the live population.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = self.find_entry(objects, key);
                self.entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                self.count += 1;
            }
        }
    }
}

// Table keys are always interned strings.
fn key_hash(objects: &[Obj], key: ObjRef) -> u32 {
    match &objects[key.index()] {
        Obj::Str(s) => s.hash,
        Obj::Fun(_) => 0,
    }
}
