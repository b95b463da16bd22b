//! Bounded least-recently-used map
//!
//! Used by path interning, the handle table and the caching decorator.
//! A capacity of zero means unbounded.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug)]
pub(crate) struct Lru<K, V> {
    capacity: usize,
    tick: u64,
    map: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Clone + Eq + Hash, V> Lru<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            map: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Looks up an entry and marks it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, used) = self.map.get_mut(key)?;
        let old = std::mem::replace(used, tick);
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(tick, k);
        }
        self.map.get(key).map(|(v, _)| v)
    }

    /// Looks up an entry without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|(v, _)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts an entry, returning whatever was evicted to make room
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let tick = self.next_tick();
        if let Some((_, old)) = self.map.remove(&key) {
            self.order.remove(&old);
        }
        self.map.insert(key.clone(), (value, tick));
        self.order.insert(tick, key);

        let mut evicted = Vec::new();
        while self.capacity > 0 && self.map.len() > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some((v, _)) = self.map.remove(&oldest) {
                evicted.push((oldest, v));
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (v, used) = self.map.remove(key)?;
        self.order.remove(&used);
        Some(v)
    }

    /// Removes every entry whose key matches the predicate
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> = self.map.keys().filter(|k| pred(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| self.remove(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut lru = Lru::new(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.get(&"a");

        let evicted = lru.insert("c", 3);
        assert_eq!(evicted, vec![("b", 2)]);
        assert!(lru.contains(&"a"));
        assert!(lru.contains(&"c"));
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut lru = Lru::new(0);
        for i in 0..100 {
            assert!(lru.insert(i, i).is_empty());
        }
        assert_eq!(lru.len(), 100);
    }

    #[test]
    fn reinsert_replaces_value() {
        let mut lru = Lru::new(4);
        lru.insert("k", 1);
        lru.insert("k", 2);

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.peek(&"k"), Some(&2));
    }

    #[test]
    fn remove_where_filters() {
        let mut lru = Lru::new(0);
        lru.insert(1, "one");
        lru.insert(2, "two");
        lru.insert(3, "three");

        let removed = lru.remove_where(|k| k % 2 == 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(lru.len(), 1);
        assert!(lru.contains(&2));
    }
}
