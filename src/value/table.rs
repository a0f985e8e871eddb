//! Open-addressing hash table keyed by strings.
//!
//! Used for globals, class method tables and instance fields. Collisions are resolved by
//! linear probing; deleted entries leave a tombstone so probe sequences stay intact.

use std::rc::Rc;

use super::object::LoxString;

const MAX_LOAD: f64 = 0.75;

#[derive(Debug, Clone)]
enum Entry<V> {
    Empty,
    Tombstone,
    Occupied { key: Rc<LoxString>, value: V },
}

#[derive(Debug, Clone)]
pub struct Table<V> {
    entries: Vec<Entry<V>>,
    /// Occupied entries plus tombstones.
    count: usize,
    live: usize,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
            live: 0,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &LoxString) -> Option<&V> {
        if self.live == 0 {
            return None;
        }
        match &self.entries[find_entry(&self.entries, key)] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &LoxString) -> Option<&mut V> {
        if self.live == 0 {
            return None;
        }
        let index = find_entry(&self.entries, key);
        match &mut self.entries[index] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &LoxString) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite. Returns `true` when the key was not present before.
    pub fn set(&mut self, key: Rc<LoxString>, value: V) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let capacity = grow_capacity(self.capacity());
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new = !matches!(entry, Entry::Occupied { .. });
        if matches!(entry, Entry::Empty) {
            self.count += 1;
        }
        if is_new {
            self.live += 1;
        }
        *entry = Entry::Occupied { key, value };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns whether a key was removed.
    pub fn delete(&mut self, key: &LoxString) -> bool {
        if self.live == 0 {
            return false;
        }
        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if !matches!(entry, Entry::Occupied { .. }) {
            return false;
        }
        *entry = Entry::Tombstone;
        self.live -= 1;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<LoxString>, &V)> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Occupied { key, value } => Some((key, value)),
            _ => None,
        })
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, empty_entries(capacity));
        self.count = 0;
        for entry in old {
            if let Entry::Occupied { key, value } = entry {
                let index = find_entry(&self.entries, &key);
                self.entries[index] = Entry::Occupied { key, value };
                self.count += 1;
            }
        }
        self.live = self.count;
    }
}

impl<V: Clone> Table<V> {
    /// Copy every entry of `self` into `to`, overwriting keys that already exist there.
    pub fn add_all(&self, to: &mut Table<V>) {
        for (key, value) in self.iter() {
            to.set(key.clone(), value.clone());
        }
    }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}

fn empty_entries<V>(capacity: usize) -> Vec<Entry<V>> {
    let mut entries = Vec::with_capacity(capacity);
    entries.resize_with(capacity, || Entry::Empty);
    entries
}

/// Index of the slot holding `key`, or of the slot an insert of `key` should use: the first
/// tombstone on the probe path if there is one, otherwise the empty slot that ended it.
///
/// `entries` must be non-empty with a power-of-two length and at least one empty slot.
fn find_entry<V>(entries: &[Entry<V>], key: &LoxString) -> usize {
    let mask = entries.len() - 1;
    let mut index = key.hash() as usize & mask;
    let mut tombstone = None;
    loop {
        match &entries[index] {
            Entry::Empty => return tombstone.unwrap_or(index),
            Entry::Tombstone => {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            }
            Entry::Occupied { key: existing, .. } => {
                if existing.hash() == key.hash() && existing.as_str() == key.as_str() {
                    return index;
                }
            }
        }
        index = (index + 1) & mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn key(text: &str) -> Rc<LoxString> {
        Rc::new(LoxString::new(text))
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut table = Table::new();
        assert!(table.set(key("a"), 1));
        assert!(table.set(key("b"), 2));
        assert!(!table.set(key("a"), 3));
        assert_eq!(table.get(&LoxString::new("a")), Some(&3));
        assert_eq!(table.get(&LoxString::new("b")), Some(&2));
        assert_eq!(table.get(&LoxString::new("c")), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_empty_table_lookups() {
        let mut table: Table<i32> = Table::new();
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.get(&LoxString::new("x")), None);
        assert!(!table.delete(&LoxString::new("x")));
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let mut table = Table::new();
        table.set(key("a"), 1);
        table.set(key("b"), 2);
        assert!(table.delete(&LoxString::new("a")));
        assert!(!table.delete(&LoxString::new("a")));
        assert_eq!(table.len(), 1);
        // The tombstone still counts towards the load.
        assert_eq!(table.count, 2);
        assert_eq!(table.get(&LoxString::new("b")), Some(&2));

        // Re-inserting reuses the tombstone instead of consuming a fresh slot.
        assert!(table.set(key("a"), 5));
        assert_eq!(table.count, 2);
        assert_eq!(table.get(&LoxString::new("a")), Some(&5));
    }

    #[test]
    fn test_growth() {
        let mut table = Table::new();
        for i in 0..6 {
            table.set(key(&format!("k{}", i)), i);
        }
        assert_eq!(table.capacity(), 8);
        table.set(key("k6"), 6);
        assert_eq!(table.capacity(), 16);
        for i in 0..7 {
            assert_eq!(table.get(&LoxString::new(format!("k{}", i))), Some(&i));
        }
    }

    #[test]
    fn test_add_all() {
        let mut from = Table::new();
        from.set(key("speak"), 1);
        from.set(key("eat"), 2);
        let mut to = Table::new();
        to.set(key("speak"), 10);
        to.set(key("run"), 3);
        from.add_all(&mut to);
        assert_eq!(to.len(), 3);
        assert_eq!(to.get(&LoxString::new("speak")), Some(&1));
        assert_eq!(to.get(&LoxString::new("run")), Some(&3));
    }

    #[test]
    fn test_matches_hashmap_under_random_operations() {
        let mut rng = StdRng::seed_from_u64(0x10c5);
        let mut table = Table::new();
        let mut model: HashMap<String, u32> = HashMap::new();

        for step in 0..5000u32 {
            let name = format!("key{}", rng.gen_range(0..200));
            if rng.gen_bool(0.6) {
                let is_new = table.set(key(&name), step);
                assert_eq!(is_new, model.insert(name, step).is_none());
            } else {
                let removed = table.delete(&LoxString::new(name.as_str()));
                assert_eq!(removed, model.remove(&name).is_some());
            }

            assert_eq!(table.len(), model.len());
            assert!(table.count as f64 <= table.capacity() as f64 * MAX_LOAD);
        }

        for (name, value) in &model {
            assert_eq!(table.get(&LoxString::new(name.as_str())), Some(value));
        }
        assert_eq!(table.iter().count(), model.len());
    }
}
