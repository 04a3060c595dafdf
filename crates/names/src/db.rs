//! Read side of the persistent name database.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use nmcd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::cache::{ExpireEntry, NameCache};
use crate::data::{Name, NameData, NameHistory};
use crate::view::NameViewError;

#[derive(Debug)]
pub struct NameDb<S> {
    store: S,
}

impl<S> NameDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> NameDb<S> {
    pub fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, NameViewError> {
        match self.store.get(Column::Name, name)? {
            Some(bytes) => NameData::decode(&bytes)
                .map(Some)
                .map_err(|_| NameViewError::Corrupt("invalid name row")),
            None => Ok(None),
        }
    }

    pub fn get_history(&self, name: &[u8]) -> Result<Option<NameHistory>, NameViewError> {
        match self.store.get(Column::NameHistory, name)? {
            Some(bytes) => NameHistory::decode(&bytes)
                .map(Some)
                .map_err(|_| NameViewError::Corrupt("invalid name history row")),
            None => Ok(None),
        }
    }

    /// Names whose expiry-index entry sits at exactly `height`.  Scans the
    /// index from `(height, ε)` and stops at the first higher entry.  A
    /// duplicate name within one height is a corruption signal.
    pub fn get_names_for_height(&self, height: u32) -> Result<BTreeSet<Name>, NameViewError> {
        let prefix = height.to_be_bytes();
        let mut names = BTreeSet::new();
        let mut duplicate = false;
        self.store
            .for_each_prefix(Column::NameExpiry, &prefix, &mut |key, _value| {
                let Some(entry) = ExpireEntry::from_key(key) else {
                    return Err(StoreError::Backend("invalid expiry index key".to_string()));
                };
                debug_assert_eq!(entry.height, height);
                if !names.insert(entry.name) {
                    duplicate = true;
                }
                Ok(())
            })?;
        if duplicate {
            return Err(NameViewError::Corrupt("duplicate name in expiry index"));
        }
        Ok(names)
    }

    /// Walk live name rows in key order, starting at `start`.  The visitor
    /// returns whether to continue.  Interruption aborts the walk with an
    /// error and no partial result contract.
    pub fn walk_names<F>(
        &self,
        start: &[u8],
        interrupt: &AtomicBool,
        mut visitor: F,
    ) -> Result<(), NameViewError>
    where
        F: FnMut(&[u8], &NameData) -> bool,
    {
        let mut interrupted = false;
        let mut corrupt = false;
        let mut stopped = false;
        self.store
            .for_each_prefix(Column::Name, &[], &mut |key, value| {
                if stopped || interrupted || corrupt {
                    return Ok(());
                }
                if interrupt.load(Ordering::Relaxed) {
                    interrupted = true;
                    return Ok(());
                }
                if key < start {
                    return Ok(());
                }
                match NameData::decode(value) {
                    Ok(data) => {
                        if !visitor(key, &data) {
                            stopped = true;
                        }
                    }
                    Err(_) => corrupt = true,
                }
                Ok(())
            })?;
        if interrupted {
            return Err(NameViewError::Interrupted);
        }
        if corrupt {
            return Err(NameViewError::Corrupt("invalid name row"));
        }
        Ok(())
    }

    /// Flush a finished cache into a store batch.
    pub fn write_cache(&self, batch: &mut WriteBatch, cache: &NameCache, history_enabled: bool) {
        cache.write_batch(batch, history_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmcd_primitives::outpoint::OutPoint;
    use nmcd_storage::memory::MemoryStore;

    fn data(height: u32) -> NameData {
        NameData {
            value: b"v".to_vec(),
            height,
            prevout: OutPoint {
                hash: [0x66; 32],
                index: 0,
            },
            address: vec![0x51],
        }
    }

    fn seeded_db() -> NameDb<MemoryStore> {
        let store = MemoryStore::new();
        let mut cache = NameCache::new();
        for (name, height) in [(&b"d/a"[..], 0x00ffu32), (b"d/b", 0x0142), (b"d/c", 0x0142)] {
            cache.set(name.to_vec(), data(height));
            cache.add_expire_index(name, height);
        }
        let mut batch = WriteBatch::new();
        cache.write_batch(&mut batch, false);
        store.write_batch(&batch).expect("seed");
        NameDb::new(store)
    }

    #[test]
    fn lookup_and_height_scan() {
        let db = seeded_db();
        assert_eq!(db.get_name(b"d/a").expect("get"), Some(data(0x00ff)));
        assert_eq!(db.get_name(b"d/x").expect("get"), None);

        assert_eq!(
            db.get_names_for_height(0x0142).expect("scan"),
            BTreeSet::from([b"d/b".to_vec(), b"d/c".to_vec()])
        );
        assert!(db.get_names_for_height(0x0141).expect("scan").is_empty());
    }

    #[test]
    fn walk_honours_start_and_stop() {
        let db = seeded_db();
        let interrupt = AtomicBool::new(false);

        let mut seen = Vec::new();
        db.walk_names(b"d/b", &interrupt, |name, _| {
            seen.push(name.to_vec());
            true
        })
        .expect("walk");
        assert_eq!(seen, vec![b"d/b".to_vec(), b"d/c".to_vec()]);

        let mut first = None;
        db.walk_names(b"", &interrupt, |name, _| {
            first = Some(name.to_vec());
            false
        })
        .expect("walk");
        assert_eq!(first, Some(b"d/a".to_vec()));
    }

    #[test]
    fn walk_interruption_is_an_error() {
        let db = seeded_db();
        let interrupt = AtomicBool::new(true);
        let result = db.walk_names(b"", &interrupt, |_, _| true);
        assert!(matches!(result, Err(NameViewError::Interrupted)));
    }
}
