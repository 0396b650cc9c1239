//! Per-kind symbol list (spec §4.7 "List operations"): a flat, append-only
//! `Vec` with tombstone deletion plus secondary name/address indices.
//!
//! Grounded in `original_source/ccc/symbol_table.h`'s
//! `SymbolList<SymbolType, unique_addresses>` template -- the
//! `unique_addresses` parameter becomes the `unique_addresses` constructor
//! argument here since const generics over a bool would add ceremony this
//! crate's teacher style doesn't otherwise use.

use std::collections::HashMap;

use super::handle::Handle;

struct Entry<T> {
    value: T,
    name: String,
    address: Option<u32>,
    is_deleted: bool,
}

/// A table of symbols of one kind, addressed by [`Handle<T>`].
pub struct SymbolList<T> {
    generation: u64,
    unique_addresses: bool,
    entries: Vec<Entry<T>>,
    by_name: HashMap<String, u32>,
    by_address: HashMap<u32, u32>,
}

impl<T> SymbolList<T> {
    pub fn new(generation: u64, unique_addresses: bool) -> SymbolList<T> {
        SymbolList {
            generation,
            unique_addresses,
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_address: HashMap::new(),
        }
    }

    /// Appends `value`. If this list enforces unique addresses and another
    /// live entry already occupies `address`, that entry is tombstoned
    /// first (spec §4.7: "`add` ... tombstones a same-address occupant").
    pub fn add(&mut self, name: String, address: Option<u32>, value: T) -> Handle<T> {
        if self.unique_addresses {
            if let Some(addr) = address {
                if let Some(&existing_index) = self.by_address.get(&addr) {
                    if let Some(existing) = self.entries.get_mut(existing_index as usize) {
                        existing.is_deleted = true;
                    }
                }
            }
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            value,
            name: name.clone(),
            address,
            is_deleted: false,
        });
        self.by_name.insert(name, index);
        if let Some(addr) = address {
            self.by_address.insert(addr, index);
        }
        Handle::new(index, self.generation)
    }

    /// Tombstones the entry at `handle`. Returns `false` if the handle is
    /// from a different generation, out of range, or already deleted.
    pub fn remove(&mut self, handle: Handle<T>) -> bool {
        if handle.generation() != self.generation {
            return false;
        }
        match self.entries.get_mut(handle.index() as usize) {
            Some(entry) if !entry.is_deleted => {
                entry.is_deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Bounds-checked, tombstone-aware access. Returns `None` for a
    /// generation mismatch, an out-of-range index, or a deleted entry.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if handle.generation() != self.generation {
            return None;
        }
        self.entries
            .get(handle.index() as usize)
            .filter(|entry| !entry.is_deleted)
            .map(|entry| &entry.value)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle<T>> {
        let index = *self.by_name.get(name)?;
        let entry = self.entries.get(index as usize)?;
        if entry.is_deleted {
            return None;
        }
        Some(Handle::new(index, self.generation))
    }

    pub fn find_by_address(&self, address: u32) -> Option<Handle<T>> {
        let index = *self.by_address.get(&address)?;
        let entry = self.entries.get(index as usize)?;
        if entry.is_deleted {
            return None;
        }
        Some(Handle::new(index, self.generation))
    }

    /// Iterates over every live (non-tombstoned) entry with its handle.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        let generation = self.generation;
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_deleted)
            .map(move |(index, entry)| (Handle::new(index as u32, generation), &entry.value))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Label;

    #[test]
    fn added_entry_is_retrievable_by_handle_and_name() {
        let mut list: SymbolList<Label> = SymbolList::new(1, false);
        let handle = list.add("start".to_string(), Some(0x1000), Label);
        assert!(list.get(handle).is_some());
        assert_eq!(list.find_by_name("start"), Some(handle));
    }

    #[test]
    fn removed_entry_is_hidden_from_iteration_and_lookup() {
        let mut list: SymbolList<Label> = SymbolList::new(1, false);
        let handle = list.add("start".to_string(), None, Label);
        assert!(list.remove(handle));
        assert!(list.get(handle).is_none());
        assert_eq!(list.iter().count(), 0);
        assert!(list.find_by_name("start").is_none());
    }

    #[test]
    fn unique_address_insert_tombstones_previous_occupant() {
        let mut list: SymbolList<Label> = SymbolList::new(1, true);
        let first = list.add("old".to_string(), Some(0x2000), Label);
        let second = list.add("new".to_string(), Some(0x2000), Label);
        assert!(list.get(first).is_none());
        assert!(list.get(second).is_some());
        assert_eq!(list.find_by_address(0x2000), Some(second));
    }

    #[test]
    fn handle_from_wrong_generation_is_rejected() {
        let list: SymbolList<Label> = SymbolList::new(2, false);
        let stale: Handle<Label> = Handle::new(0, 1);
        assert!(list.get(stale).is_none());
    }
}
