//! The process dictionary: a pair of chaining tables with progressive rehash.
//!
//! Growth never stalls the server. When the primary table's load factor hits
//! [`DICT_MAX_LOAD`](crate::config::DICT_MAX_LOAD), it is demoted to
//! `secondary` and a doubled primary takes its place; every subsequent
//! operation then carries up to
//! [`DICT_MIGRATE_QUANTUM`](crate::config::DICT_MIGRATE_QUANTUM) nodes across
//! before doing its own work. While a drain is in flight, reads consult the
//! primary first and fall back to the secondary; inserts only ever touch the
//! primary, so the secondary strictly shrinks and is freed once empty.

pub mod table;

use crate::config::{DICT_INITIAL_BUCKETS, DICT_MAX_LOAD, DICT_MIGRATE_QUANTUM};

use table::{HTab, Node};

/// Two-table dictionary keyed by a caller-computed 64-bit hash plus an
/// equality predicate over the payload.
pub struct HMap<T> {
    primary: HTab<T>,
    secondary: Option<HTab<T>>,
    /// Next bucket of `secondary` to drain.
    migrate_pos: usize,
}

impl<T> Default for HMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HMap<T> {
    pub fn new() -> Self {
        HMap {
            primary: HTab::with_buckets(DICT_INITIAL_BUCKETS),
            secondary: None,
            migrate_pos: 0,
        }
    }

    /// Total live entries across both tables.
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.as_ref().map_or(0, HTab::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a rehash drain is in flight.
    pub fn is_migrating(&self) -> bool {
        self.secondary.is_some()
    }

    /// Find the entry with `hash` for which `eq` holds. At most two bucket
    /// walks: primary, then the draining secondary.
    pub fn lookup(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<&T> {
        self.help_migrate();
        if let Some(item) = self.primary.lookup(hash, &mut eq) {
            return Some(item);
        }
        self.secondary.as_ref().and_then(|sec| sec.lookup(hash, eq))
    }

    /// Mutable variant of [`lookup`](Self::lookup).
    pub fn lookup_mut(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.help_migrate();
        if let Some(item) = self.primary.lookup_mut(hash, &mut eq) {
            return Some(item);
        }
        self.secondary.as_mut().and_then(|sec| sec.lookup_mut(hash, eq))
    }

    /// Insert a new entry. The caller is responsible for not inserting a
    /// duplicate key (check with [`lookup_mut`](Self::lookup_mut) first).
    pub fn insert(&mut self, hash: u64, item: T) {
        self.help_migrate();
        self.primary.insert(Node::new(hash, item));
        self.maybe_grow();
    }

    /// Remove and return the matching entry, if present.
    pub fn remove(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        self.help_migrate();
        if let Some(node) = self.primary.detach(hash, &mut eq) {
            return Some(node.into_item());
        }
        let node = self.secondary.as_mut()?.detach(hash, eq)?;
        Some(node.into_item())
    }

    /// Visit every entry in both tables. The callback must not mutate the
    /// dictionary (enforced by the shared borrow).
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.primary.for_each(&mut f);
        if let Some(sec) = &self.secondary {
            sec.for_each(&mut f);
        }
    }

    /// Move a bounded batch of nodes from the draining table into the
    /// primary, freeing the secondary once it runs dry.
    fn help_migrate(&mut self) {
        let HMap { primary, secondary, migrate_pos } = self;
        let Some(sec) = secondary.as_mut() else { return };
        let mut moved = 0;
        while moved < DICT_MIGRATE_QUANTUM && *migrate_pos < sec.n_buckets() {
            match sec.take_from_bucket(*migrate_pos) {
                Some(node) => {
                    primary.insert(node);
                    moved += 1;
                }
                None => *migrate_pos += 1,
            }
        }
        if *migrate_pos >= sec.n_buckets() {
            debug_assert!(sec.is_empty());
            *secondary = None;
            *migrate_pos = 0;
        }
    }

    /// Kick off a rehash when the primary's load factor crosses the
    /// threshold and no drain is already running.
    fn maybe_grow(&mut self) {
        if self.secondary.is_some() {
            return;
        }
        if self.primary.len() < self.primary.n_buckets() * DICT_MAX_LOAD {
            return;
        }
        let doubled = HTab::with_buckets(self.primary.n_buckets() * 2);
        self.secondary = Some(std::mem::replace(&mut self.primary, doubled));
        self.migrate_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::str_hash;

    struct Pair {
        key: Vec<u8>,
        val: u64,
    }

    fn insert_pair(map: &mut HMap<Pair>, key: &[u8], val: u64) {
        let h = str_hash(key);
        map.insert(h, Pair { key: key.to_vec(), val });
    }

    fn get(map: &mut HMap<Pair>, key: &[u8]) -> Option<u64> {
        let h = str_hash(key);
        map.lookup(h, |p| p.key == key).map(|p| p.val)
    }

    #[test]
    fn insert_lookup_remove() {
        let mut map = HMap::new();
        insert_pair(&mut map, b"alpha", 1);
        insert_pair(&mut map, b"beta", 2);
        assert_eq!(map.len(), 2);
        assert_eq!(get(&mut map, b"alpha"), Some(1));
        assert_eq!(get(&mut map, b"beta"), Some(2));
        assert_eq!(get(&mut map, b"gamma"), None);

        let h = str_hash(b"alpha");
        let removed = map.remove(h, |p| p.key == b"alpha");
        assert_eq!(removed.map(|p| p.val), Some(1));
        assert_eq!(get(&mut map, b"alpha"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_missing_is_none() {
        let mut map: HMap<Pair> = HMap::new();
        assert!(map.remove(str_hash(b"nope"), |p| p.key == b"nope").is_none());
    }

    #[test]
    fn growth_keeps_every_key_reachable() {
        let mut map = HMap::new();
        // Enough to trigger several promotions from the 4-bucket start.
        for i in 0..2_000u64 {
            let key = format!("key-{i}");
            insert_pair(&mut map, key.as_bytes(), i);
        }
        assert_eq!(map.len(), 2_000);
        for i in 0..2_000u64 {
            let key = format!("key-{i}");
            assert_eq!(get(&mut map, key.as_bytes()), Some(i), "lost {key}");
        }
    }

    #[test]
    fn migration_eventually_drains_the_secondary() {
        let mut map = HMap::new();
        for i in 0..600u64 {
            insert_pair(&mut map, format!("k{i}").as_bytes(), i);
        }
        // Keep poking the map until the drain finishes; each lookup moves a
        // bounded batch, so this must terminate well within the bound below.
        let mut ticks = 0;
        while map.is_migrating() {
            let _ = get(&mut map, b"k0");
            ticks += 1;
            assert!(ticks < 1_000, "drain never finished");
        }
        assert_eq!(map.len(), 600);
        for i in 0..600u64 {
            assert_eq!(get(&mut map, format!("k{i}").as_bytes()), Some(i));
        }
    }

    #[test]
    fn removal_works_mid_migration() {
        let mut map = HMap::new();
        for i in 0..400u64 {
            insert_pair(&mut map, format!("k{i}").as_bytes(), i);
        }
        // Delete a spread of keys regardless of which table currently holds
        // them.
        for i in (0..400u64).step_by(7) {
            let key = format!("k{i}");
            let h = str_hash(key.as_bytes());
            assert!(map.remove(h, |p| p.key == key.as_bytes()).is_some(), "missing {key}");
        }
        for i in 0..400u64 {
            let key = format!("k{i}");
            let expect = if i % 7 == 0 { None } else { Some(i) };
            assert_eq!(get(&mut map, key.as_bytes()), expect);
        }
    }

    #[test]
    fn for_each_spans_both_tables() {
        let mut map = HMap::new();
        for i in 0..300u64 {
            insert_pair(&mut map, format!("k{i}").as_bytes(), i);
        }
        // A fresh burst of inserts leaves the map mid-drain more often than
        // not; either way every entry must be visited exactly once.
        let mut sum = 0u64;
        let mut count = 0usize;
        map.for_each(|p| {
            sum += p.val;
            count += 1;
        });
        assert_eq!(count, 300);
        assert_eq!(sum, (0..300).sum());
    }

    #[test]
    fn overwrite_via_lookup_mut() {
        let mut map = HMap::new();
        insert_pair(&mut map, b"k", 1);
        if let Some(p) = map.lookup_mut(str_hash(b"k"), |p| p.key == b"k") {
            p.val = 99;
        }
        assert_eq!(get(&mut map, b"k"), Some(99));
    }
}
