//! Hash-bucketed set and map keyed by structural value equality.
//!
//! Bucket placement hashes the canonical string form of a value (see
//! [`Value::hash_key`]); collisions are resolved by comparing every entry in
//! the bucket with [`Value::is_equals`]. This lets arbitrary nested values act
//! as keys without a generic structural hash.

use std::{
    cell::RefCell,
    hash::{Hash, Hasher},
};

use rustc_hash::FxHasher;

use crate::value::Value;

/// Bucket table sizes, ascending.
const TABLE_SIZES: [usize; 24] = [
    5, 11, 23, 47, 97, 199, 409, 823, 1741, 3469, 6949, 14033, 28411, 57557, 116731, 236897,
    480881, 976369, 1982627, 4026031, 8175383, 16601593, 33712729, 68460391,
];

fn table_size_for(count: usize) -> usize {
    let estimate = (count as f64 * 1.3).ceil() as usize;
    TABLE_SIZES
        .iter()
        .copied()
        .find(|size| *size >= estimate)
        .unwrap_or(TABLE_SIZES[TABLE_SIZES.len() - 1])
}

fn hash_value(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash_key().hash(&mut hasher);
    hasher.finish()
}

trait Keyed {
    fn key(&self) -> &Value;
}

impl Keyed for Value {
    fn key(&self) -> &Value {
        self
    }
}

impl Keyed for (Value, Value) {
    fn key(&self) -> &Value {
        &self.0
    }
}

/// Buckets keep each entry's hash so rehashing never recomputes keys.
#[derive(Clone)]
struct HashTable<E> {
    buckets: Vec<Vec<(u64, E)>>,
    count: usize,
}

impl<E: Keyed + Clone> HashTable<E> {
    fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); TABLE_SIZES[0]],
            count: 0,
        }
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Position of the entry equal to `key` within its bucket.
    fn locate(&self, hash: u64, key: &Value) -> Option<usize> {
        self.buckets[self.bucket_index(hash)]
            .iter()
            .position(|(_, entry)| entry.key().is_equals(key))
    }

    fn find(&self, key: &Value) -> Option<&E> {
        let hash = hash_value(key);
        let position = self.locate(hash, key)?;
        self.buckets[self.bucket_index(hash)]
            .get(position)
            .map(|(_, entry)| entry)
    }

    /// Stores `entry` at a slot found by [`HashTable::locate`]. Neither
    /// hashes nor compares values.
    fn place(&mut self, hash: u64, entry: E, existing: Option<usize>) -> Option<E> {
        let index = self.bucket_index(hash);
        let bucket = &mut self.buckets[index];
        if let Some(slot) = existing.and_then(|position| bucket.get_mut(position)) {
            return Some(std::mem::replace(&mut slot.1, entry));
        }
        bucket.push((hash, entry));
        self.count += 1;
        self.resize_if_needed();
        None
    }

    fn insert(&mut self, entry: E) -> Option<E> {
        let hash = hash_value(entry.key());
        let existing = self.locate(hash, entry.key());
        self.place(hash, entry, existing)
    }

    fn remove(&mut self, key: &Value) -> Option<E> {
        let hash = hash_value(key);
        let position = self.locate(hash, key)?;
        let index = self.bucket_index(hash);
        let (_, removed) = self.buckets[index].swap_remove(position);
        self.count -= 1;
        self.resize_if_needed();
        Some(removed)
    }

    fn resize_if_needed(&mut self) {
        let size = self.buckets.len();
        if self.count > size || self.count < size / 2 {
            let wanted = table_size_for(self.count);
            if wanted != size {
                self.rehash(wanted);
            }
        }
    }

    fn rehash(&mut self, size: usize) {
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); size]);
        for (hash, entry) in old.into_iter().flatten() {
            let index = self.bucket_index(hash);
            self.buckets[index].push((hash, entry));
        }
    }

    fn iter(&self) -> impl Iterator<Item = &E> {
        self.buckets.iter().flatten().map(|(_, entry)| entry)
    }
}

/// Set of values with structural membership.
#[derive(Clone)]
pub struct ValueSet {
    table: HashTable<Value>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self {
            table: HashTable::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.count
    }

    pub fn is_empty(&self) -> bool {
        self.table.count == 0
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.table.find(value).is_some()
    }

    /// Returns false when an equal value was already present.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.table.insert(value);
        true
    }

    /// Inserts into a set shared behind a `RefCell`. Hashing and equality
    /// run under a shared borrow, so `value` may itself mention the set.
    pub fn insert_shared(set: &RefCell<ValueSet>, value: Value) -> bool {
        let hash = hash_value(&value);
        if set.borrow().table.locate(hash, &value).is_some() {
            return false;
        }
        set.borrow_mut().table.place(hash, value, None);
        true
    }

    pub fn remove(&mut self, value: &Value) -> bool {
        self.table.remove(value).is_some()
    }

    /// Elements in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.table.iter()
    }

    /// Elements in the value total order.
    pub fn sorted(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self.iter().cloned().collect();
        values.sort_by(Value::compare_to);
        values
    }

    pub fn bucket_count(&self) -> usize {
        self.table.buckets.len()
    }
}

impl Default for ValueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Map from values to values with structural key lookup.
#[derive(Clone)]
pub struct ValueMap {
    table: HashTable<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self {
            table: HashTable::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.count
    }

    pub fn is_empty(&self) -> bool {
        self.table.count == 0
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.table.find(key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.table.find(key).is_some()
    }

    /// Returns the previous value bound to an equal key.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        self.table.insert((key, value)).map(|(_, previous)| previous)
    }

    /// Map counterpart of [`ValueSet::insert_shared`].
    pub fn insert_shared(map: &RefCell<ValueMap>, key: Value, value: Value) -> Option<Value> {
        let hash = hash_value(&key);
        let existing = map.borrow().table.locate(hash, &key);
        map.borrow_mut()
            .table
            .place(hash, (key, value), existing)
            .map(|(_, previous)| previous)
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.table.remove(key).map(|(_, value)| value)
    }

    /// Entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.table.iter().map(|(key, value)| (key, value))
    }

    /// Entries sorted by key in the value total order.
    pub fn sorted_entries(&self) -> Vec<(Value, Value)> {
        let mut entries: Vec<(Value, Value)> = self.table.iter().cloned().collect();
        entries.sort_by(|a, b| a.0.compare_to(&b.0));
        entries
    }

    pub fn sorted_keys(&self) -> Vec<Value> {
        self.sorted_entries().into_iter().map(|(key, _)| key).collect()
    }

    pub fn sorted_values(&self) -> Vec<Value> {
        self.sorted_entries()
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.table.buckets.len()
    }
}

impl Default for ValueMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|n| Value::Int(*n)).collect()
    }

    #[test]
    fn insert_then_remove_restores_membership() {
        let mut set: ValueSet = ints(&[1, 2, 3]).into_iter().collect();
        let before = set.sorted();
        assert!(set.insert(Value::string("x")));
        assert!(set.contains(&Value::string("x")));
        assert!(set.remove(&Value::string("x")));
        assert!(!set.contains(&Value::string("x")));
        assert_eq!(set.len(), 3);
        let after = set.sorted();
        assert!(before.iter().zip(after.iter()).all(|(a, b)| a.is_equals(b)));
    }

    #[test]
    fn equal_numbers_share_a_slot() {
        let mut set = ValueSet::new();
        assert!(set.insert(Value::Int(1)));
        assert!(!set.insert(Value::Decimal(1.0)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn structurally_equal_lists_are_one_element() {
        let mut set = ValueSet::new();
        set.insert(Value::list(ints(&[1, 2])));
        set.insert(Value::list(ints(&[1, 2])));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&Value::list(ints(&[1, 2]))));
    }

    #[test]
    fn rehash_never_loses_or_duplicates() {
        let mut set = ValueSet::new();
        let initial = set.bucket_count();
        for n in 0..500 {
            set.insert(Value::Int(n));
        }
        assert!(set.bucket_count() > initial);
        assert_eq!(set.len(), 500);
        let grown = set.sorted();
        assert_eq!(grown.len(), 500);
        for (expected, value) in (0..500).zip(grown.iter()) {
            assert!(value.is_equals(&Value::Int(expected)));
        }

        for n in 0..490 {
            assert!(set.remove(&Value::Int(n)));
        }
        assert!(set.bucket_count() < 500);
        let shrunk = set.sorted();
        assert_eq!(shrunk.len(), 10);
        for (expected, value) in (490..500).zip(shrunk.iter()) {
            assert!(value.is_equals(&Value::Int(expected)));
        }
    }

    #[test]
    fn map_replaces_values_for_equal_keys() {
        let mut map = ValueMap::new();
        assert!(map.insert(Value::string("a"), Value::Int(1)).is_none());
        let previous = map.insert(Value::string("a"), Value::Int(2));
        assert!(previous.is_some_and(|v| v.is_equals(&Value::Int(1))));
        assert_eq!(map.len(), 1);
        assert!(map
            .get(&Value::string("a"))
            .is_some_and(|v| v.is_equals(&Value::Int(2))));
        assert!(map.remove(&Value::string("a")).is_some());
        assert!(map.is_empty());
    }

    #[test]
    fn map_entries_sort_by_key() {
        let mut map = ValueMap::new();
        for key in ["c", "a", "b"] {
            map.insert(Value::string(key), Value::Null);
        }
        let keys: Vec<String> = map.sorted_keys().iter().map(Value::to_text).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
