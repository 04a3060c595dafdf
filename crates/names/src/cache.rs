//! Write-buffer for a batch of name database changes.

use std::collections::{BTreeMap, BTreeSet};

use nmcd_storage::{Column, WriteBatch};

use crate::data::{Name, NameData, NameHistory};

/// Expiry index key: ordered by height first, then bytewise by name.  The
/// on-disk key encodes the height big-endian so the store's lexicographic
/// order matches this one.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpireEntry {
    pub height: u32,
    pub name: Name,
}

impl ExpireEntry {
    pub fn new(height: u32, name: Name) -> Self {
        Self { height, name }
    }

    pub fn key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + self.name.len());
        key.extend_from_slice(&self.height.to_be_bytes());
        key.extend_from_slice(&self.name);
        key
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() < 4 {
            return None;
        }
        let height = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
        Some(Self {
            height,
            name: key[4..].to_vec(),
        })
    }
}

/// Buffered changes against a base view: upserts, tombstones, history
/// replacements, and expiry-index deltas.  Composable via `apply` and
/// flushed with `write_batch`.
#[derive(Clone, Debug, Default)]
pub struct NameCache {
    entries: BTreeMap<Name, NameData>,
    deleted: BTreeSet<Name>,
    /// Replacement history stacks; an empty stack erases the row.
    history: BTreeMap<Name, NameHistory>,
    /// `true` adds the entry, `false` removes it.  A later write wins.
    expire_index: BTreeMap<ExpireEntry, bool>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.deleted.clear();
        self.history.clear();
        self.expire_index.clear();
    }

    /// True iff no changes are buffered.  A cache without entry or tombstone
    /// changes must not carry history or expiry deltas either.
    pub fn is_clean(&self) -> bool {
        if self.entries.is_empty() && self.deleted.is_empty() {
            debug_assert!(self.history.is_empty() && self.expire_index.is_empty());
            return true;
        }
        false
    }

    pub fn is_deleted(&self, name: &[u8]) -> bool {
        self.deleted.contains(name)
    }

    /// Looks only at buffered upserts; tombstones are the caller's business
    /// via `is_deleted`.
    pub fn get(&self, name: &[u8]) -> Option<&NameData> {
        self.entries.get(name)
    }

    pub fn get_history(&self, name: &[u8]) -> Option<&NameHistory> {
        self.history.get(name)
    }

    pub fn set(&mut self, name: Name, data: NameData) {
        self.deleted.remove(&name);
        self.entries.insert(name, data);
    }

    pub fn set_history(&mut self, name: Name, history: NameHistory) {
        self.history.insert(name, history);
    }

    pub fn remove(&mut self, name: Name) {
        self.entries.remove(&name);
        self.deleted.insert(name);
    }

    pub fn add_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index
            .insert(ExpireEntry::new(height, name.to_vec()), true);
    }

    pub fn remove_expire_index(&mut self, name: &[u8], height: u32) {
        self.expire_index
            .insert(ExpireEntry::new(height, name.to_vec()), false);
    }

    /// Overlay the buffered expiry deltas for one height onto the base
    /// view's raw set of names indexed at that height.
    pub fn update_names_for_height(&self, height: u32, names: &mut BTreeSet<Name>) {
        let seek = ExpireEntry::new(height, Vec::new());
        for (entry, add) in self.expire_index.range(seek..) {
            if entry.height > height {
                break;
            }
            if *add {
                names.insert(entry.name.clone());
            } else {
                names.remove(&entry.name);
            }
        }
    }

    /// Compose a child cache onto this one.  Child upserts override, child
    /// tombstones win over own upserts, child history replaces, and child
    /// expiry deltas supersede per entry.
    pub fn apply(&mut self, child: NameCache) {
        for (name, data) in child.entries {
            self.set(name, data);
        }
        for name in child.deleted {
            self.remove(name);
        }
        for (name, history) in child.history {
            self.set_history(name, history);
        }
        for (entry, add) in child.expire_index {
            self.expire_index.insert(entry, add);
        }
    }

    /// Flush the buffered changes into a store batch.
    pub fn write_batch(&self, batch: &mut WriteBatch, history_enabled: bool) {
        debug_assert!(history_enabled || self.history.is_empty());

        for (name, data) in &self.entries {
            batch.put(Column::Name, name.as_slice(), data.encode());
        }
        for name in &self.deleted {
            batch.delete(Column::Name, name.as_slice());
        }
        for (name, history) in &self.history {
            if history.is_empty() {
                batch.delete(Column::NameHistory, name.as_slice());
            } else {
                batch.put(Column::NameHistory, name.as_slice(), history.encode());
            }
        }
        for (entry, add) in &self.expire_index {
            if *add {
                batch.put(Column::NameExpiry, entry.key(), []);
            } else {
                batch.delete(Column::NameExpiry, entry.key());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmcd_primitives::outpoint::OutPoint;
    use nmcd_storage::memory::MemoryStore;
    use nmcd_storage::KeyValueStore;

    fn data(height: u32, value: &[u8]) -> NameData {
        NameData {
            value: value.to_vec(),
            height,
            prevout: OutPoint {
                hash: [0x33; 32],
                index: 0,
            },
            address: vec![0x51],
        }
    }

    #[test]
    fn expire_entry_key_orders_by_height_then_name() {
        let low = ExpireEntry::new(0x00ff, b"z".to_vec());
        let high = ExpireEntry::new(0x0142, b"a".to_vec());
        assert!(low < high);
        // Byte order of the serialized keys must agree with the value order;
        // a little-endian height would order these the wrong way around.
        assert!(low.key() < high.key());

        let parsed = ExpireEntry::from_key(&high.key()).expect("parse");
        assert_eq!(parsed, high);
    }

    #[test]
    fn set_clears_tombstone() {
        let mut cache = NameCache::new();
        cache.remove(b"d/a".to_vec());
        assert!(cache.is_deleted(b"d/a"));
        cache.set(b"d/a".to_vec(), data(1, b"v"));
        assert!(!cache.is_deleted(b"d/a"));
        assert_eq!(cache.get(b"d/a"), Some(&data(1, b"v")));
    }

    #[test]
    fn remove_drops_entry() {
        let mut cache = NameCache::new();
        cache.set(b"d/a".to_vec(), data(1, b"v"));
        cache.remove(b"d/a".to_vec());
        assert!(cache.get(b"d/a").is_none());
        assert!(cache.is_deleted(b"d/a"));
    }

    #[test]
    fn expire_delta_supersession() {
        let mut cache = NameCache::new();
        cache.add_expire_index(b"d/a", 5);
        cache.remove_expire_index(b"d/a", 5);

        let mut names = BTreeSet::new();
        names.insert(b"d/a".to_vec());
        cache.update_names_for_height(5, &mut names);
        assert!(names.is_empty());

        cache.add_expire_index(b"d/a", 5);
        cache.update_names_for_height(5, &mut names);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn update_names_for_height_is_height_scoped() {
        let mut cache = NameCache::new();
        cache.add_expire_index(b"d/a", 5);
        cache.add_expire_index(b"d/b", 6);
        cache.remove_expire_index(b"d/c", 4);

        let mut names = BTreeSet::new();
        names.insert(b"d/c".to_vec());
        cache.update_names_for_height(5, &mut names);
        assert_eq!(names, BTreeSet::from([b"d/a".to_vec(), b"d/c".to_vec()]));
    }

    #[test]
    fn child_tombstone_wins_over_parent_entry() {
        let mut parent = NameCache::new();
        parent.set(b"d/a".to_vec(), data(1, b"v1"));
        parent.set(b"d/b".to_vec(), data(1, b"v1"));

        let mut child = NameCache::new();
        child.remove(b"d/a".to_vec());
        child.set(b"d/b".to_vec(), data(2, b"v2"));

        parent.apply(child);
        assert!(parent.get(b"d/a").is_none());
        assert!(parent.is_deleted(b"d/a"));
        assert_eq!(parent.get(b"d/b"), Some(&data(2, b"v2")));
    }

    /// Composing caches and flushing once must hit the store the same way
    /// as flushing each cache in order.
    #[test]
    fn compose_then_flush_matches_sequential_flush() {
        let mut first = NameCache::new();
        first.set(b"d/a".to_vec(), data(1, b"v1"));
        first.add_expire_index(b"d/a", 1);
        first.set(b"d/b".to_vec(), data(1, b"v1"));
        first.add_expire_index(b"d/b", 1);

        let mut second = NameCache::new();
        second.remove(b"d/b".to_vec());
        second.remove_expire_index(b"d/b", 1);
        second.set(b"d/a".to_vec(), data(3, b"v3"));
        second.remove_expire_index(b"d/a", 1);
        second.add_expire_index(b"d/a", 3);

        let sequential = MemoryStore::new();
        for cache in [&first, &second] {
            let mut batch = WriteBatch::new();
            cache.write_batch(&mut batch, false);
            sequential.write_batch(&batch).expect("write");
        }

        let composed_store = MemoryStore::new();
        let mut composed = first.clone();
        composed.apply(second);
        let mut batch = WriteBatch::new();
        composed.write_batch(&mut batch, false);
        composed_store.write_batch(&batch).expect("write");

        for column in [Column::Name, Column::NameExpiry] {
            assert_eq!(
                sequential.scan_prefix(column, &[]).expect("scan"),
                composed_store.scan_prefix(column, &[]).expect("scan"),
                "column {column:?} diverged"
            );
        }
    }

    #[test]
    fn empty_history_erases_row() {
        let store = MemoryStore::new();
        store
            .put(Column::NameHistory, b"d/a", &NameHistory::default().encode())
            .expect("seed");

        let mut cache = NameCache::new();
        cache.set(b"d/a".to_vec(), data(1, b"v"));
        cache.set_history(b"d/a".to_vec(), NameHistory::default());
        let mut batch = WriteBatch::new();
        cache.write_batch(&mut batch, true);
        store.write_batch(&batch).expect("write");

        assert_eq!(store.get(Column::NameHistory, b"d/a").expect("get"), None);
    }
}
