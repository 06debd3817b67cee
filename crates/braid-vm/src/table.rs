//! Open-addressed hash table keyed by interned strings.
//!
//! Used both for the VM's globals table and for each instance's field set.
//! Capacity is always zero or a power of two so probing can use a bitmask
//! instead of a modulo.

use crate::object::GcRef;
use crate::value::Value;

const LOAD_FACTOR_MAX: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone)]
struct Entry {
    key: Option<GcRef>,
    value: Value,
}

/// FNV-1a over raw bytes, matching the hash stored on every interned
/// `ObjString` so table probing and interner lookup agree.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.entries.len() * std::mem::size_of::<Entry>()
    }

    fn key_hash(key: GcRef) -> u32 {
        key.as_string().expect("table keys are always interned strings").hash
    }

    /// Linear probe starting at `hash`, returning the slot a key hashing to
    /// `hash` and comparing equal via `matches` would occupy: either the
    /// slot already holding it, the first tombstone seen, or the first
    /// truly empty slot.
    fn find_slot(entries: &[Entry], hash: u32, mut matches: impl FnMut(&Entry) -> bool) -> usize {
        let mask = entries.len() - 1;
        let mut index = (hash as usize) & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                None if entry.value == Value::Bool(true) => {
                    // tombstone
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                None => {
                    return tombstone.unwrap_or(index);
                }
                Some(_) if matches(entry) => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };
        let mut new_entries = Vec::with_capacity(new_cap);
        new_entries.resize_with(new_cap, || Entry { key: None, value: Value::Nil });

        let mut new_count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let hash = Self::key_hash(key);
                let idx = Self::find_slot(&new_entries, hash, |e| e.key == Some(key));
                new_entries[idx] = Entry { key: Some(key), value: entry.value };
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Inserts or overwrites `key`. Returns `true` if this created a new
    /// entry (as opposed to overwriting an existing one).
    pub fn set(&mut self, key: GcRef, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * LOAD_FACTOR_MAX {
            self.grow();
        }
        let hash = Self::key_hash(key);
        let idx = Self::find_slot(&self.entries, hash, |e| e.key == Some(key));
        let is_new = self.entries[idx].key.is_none();
        if is_new {
            self.count += 1;
        }
        self.entries[idx] = Entry { key: Some(key), value };
        is_new
    }

    #[must_use]
    pub fn get(&self, key: GcRef) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = Self::key_hash(key);
        let idx = Self::find_slot(&self.entries, hash, |e| e.key == Some(key));
        self.entries[idx].key.map(|_| self.entries[idx].value)
    }

    /// Removes `key`, leaving a tombstone so later probe chains through this
    /// slot remain intact. Returns `true` if the key was present.
    pub fn delete(&mut self, key: GcRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = Self::key_hash(key);
        let idx = Self::find_slot(&self.entries, hash, |e| e.key == Some(key));
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry { key: None, value: Value::Bool(true) };
        true
    }

    /// Looks up an interned string by its raw content rather than by an
    /// already-existing `GcRef`, so the interner can answer "do we already
    /// have this string" before allocating a new one.
    #[must_use]
    pub fn find_string(&self, bytes: &str, hash: u32) -> Option<GcRef> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if entry.value != Value::Bool(true) => return None,
                Some(key) => {
                    let s = key.as_string().expect("string table keys are strings");
                    if s.hash == hash && &*s.bytes == bytes {
                        return Some(key);
                    }
                }
                None => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Removes every entry whose key is unmarked. Used to keep the string
    /// interner from holding a string alive past the collector's sweep.
    pub fn remove_unmarked(&mut self) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key
                && !key.is_marked()
            {
                entry.key = None;
                entry.value = Value::Bool(true);
                self.count -= 1;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_deterministic() {
        assert_eq!(fnv1a(b"hello"), fnv1a(b"hello"));
        assert_ne!(fnv1a(b"hello"), fnv1a(b"world"));
    }

    #[test]
    fn capacity_is_always_power_of_two_or_zero() {
        let table = Table::new();
        assert_eq!(table.capacity(), 0);
    }
}
