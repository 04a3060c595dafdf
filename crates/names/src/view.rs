//! The abstract coin/name view and the layered cache over it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nmcd_primitives::outpoint::OutPoint;
use nmcd_storage::StoreError;

use crate::cache::NameCache;
use crate::data::{Name, NameData, NameHistory};

/// An unspent output as the name engine sees it.  `height` is the creation
/// height, or the mempool sentinel for unconfirmed coins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
}

#[derive(Debug)]
pub enum NameViewError {
    Store(String),
    Corrupt(&'static str),
    Interrupted,
}

impl fmt::Display for NameViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameViewError::Store(message) => write!(f, "{message}"),
            NameViewError::Corrupt(message) => write!(f, "{message}"),
            NameViewError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for NameViewError {}

impl From<StoreError> for NameViewError {
    fn from(err: StoreError) -> Self {
        NameViewError::Store(err.to_string())
    }
}

/// Read capabilities the engine needs from its surroundings.  Implemented by
/// the persistent store, by in-memory caches, and by mempool-backed
/// overlays; the engine is polymorphic over the capability, not over any
/// concrete store.
pub trait NameView {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError>;
    fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, NameViewError>;
    fn get_name_history(&self, name: &[u8]) -> Result<Option<NameHistory>, NameViewError>;
    fn names_for_height(&self, height: u32) -> Result<BTreeSet<Name>, NameViewError>;
}

/// An empty base view, for tests and for bootstrapping a fresh chain.
pub struct EmptyView;

impl NameView for EmptyView {
    fn get_coin(&self, _outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError> {
        Ok(None)
    }

    fn get_name(&self, _name: &[u8]) -> Result<Option<NameData>, NameViewError> {
        Ok(None)
    }

    fn get_name_history(&self, _name: &[u8]) -> Result<Option<NameHistory>, NameViewError> {
        Ok(None)
    }

    fn names_for_height(&self, _height: u32) -> Result<BTreeSet<Name>, NameViewError> {
        Ok(BTreeSet::new())
    }
}

/// Diff view layered over a base.  Owns one `NameCache` plus the coin
/// modifications of the frame that created it; committed by handing the
/// parts to the batch writer, or simply dropped.
pub struct NameStateCache<'v> {
    base: &'v dyn NameView,
    names: NameCache,
    /// `Some` = created or restored in this frame, `None` = spent.
    coins: BTreeMap<OutPoint, Option<Coin>>,
    history_enabled: bool,
}

impl<'v> NameStateCache<'v> {
    pub fn new(base: &'v dyn NameView, history_enabled: bool) -> Self {
        Self {
            base,
            names: NameCache::new(),
            coins: BTreeMap::new(),
            history_enabled,
        }
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, Some(coin));
    }

    /// Spend a coin, returning it.  `Ok(None)` means the coin does not
    /// exist in this view.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError> {
        let coin = self.get_coin(outpoint)?;
        if coin.is_some() {
            self.coins.insert(outpoint.clone(), None);
        }
        Ok(coin)
    }

    /// Mark a coin row for deletion whether or not it exists, e.g. when a
    /// disconnect removes a block's outputs (some may have been burnt).
    pub fn remove_coin(&mut self, outpoint: &OutPoint) {
        self.coins.insert(outpoint.clone(), None);
    }

    /// Record a new or updated name.  The overwritten record, if any, moves
    /// onto the history stack (when enabled) and out of the expiry index.
    pub fn set_name(&mut self, name: &[u8], data: NameData) -> Result<(), NameViewError> {
        if let Some(old) = self.get_name(name)? {
            self.names.remove_expire_index(name, old.height);
            if self.history_enabled {
                let mut history = self.get_name_history(name)?.unwrap_or_default();
                history.push(old).map_err(NameViewError::Corrupt)?;
                self.names.set_history(name.to_vec(), history);
            }
        }
        self.names.add_expire_index(name, data.height);
        self.names.set(name.to_vec(), data);
        Ok(())
    }

    /// Restore a record while undoing the operation that overwrote it.  The
    /// history stack pops instead of pushing.
    pub fn set_name_undo(&mut self, name: &[u8], data: NameData) -> Result<(), NameViewError> {
        if let Some(current) = self.get_name(name)? {
            self.names.remove_expire_index(name, current.height);
        }
        if self.history_enabled {
            let mut history = self.get_name_history(name)?.unwrap_or_default();
            history.pop(&data).map_err(NameViewError::Corrupt)?;
            self.names.set_history(name.to_vec(), history);
        }
        self.names.add_expire_index(name, data.height);
        self.names.set(name.to_vec(), data);
        Ok(())
    }

    /// Re-insert a record whose row was dropped by expiration.  No history
    /// bookkeeping: expiration never touched the stack.
    pub fn restore_name(&mut self, name: &[u8], data: NameData) -> Result<(), NameViewError> {
        if let Some(existing) = self.get_name(name)? {
            self.names.remove_expire_index(name, existing.height);
        }
        self.names.add_expire_index(name, data.height);
        self.names.set(name.to_vec(), data);
        Ok(())
    }

    /// Drop a live name row together with its expiry-index entry.
    pub fn delete_name(&mut self, name: &[u8]) -> Result<(), NameViewError> {
        match self.get_name(name)? {
            Some(old) => self.names.remove_expire_index(name, old.height),
            None => return Err(NameViewError::Corrupt("deleting a nonexistent name")),
        }
        self.names.remove(name.to_vec());
        Ok(())
    }

    /// Hand the buffered contents to the committer.
    pub fn into_parts(self) -> (NameCache, Vec<(OutPoint, Option<Coin>)>) {
        (self.names, self.coins.into_iter().collect())
    }

    pub fn name_cache(&self) -> &NameCache {
        &self.names
    }
}

impl NameView for NameStateCache<'_> {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError> {
        if let Some(entry) = self.coins.get(outpoint) {
            return Ok(entry.clone());
        }
        self.base.get_coin(outpoint)
    }

    fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, NameViewError> {
        if self.names.is_deleted(name) {
            return Ok(None);
        }
        if let Some(data) = self.names.get(name) {
            return Ok(Some(data.clone()));
        }
        self.base.get_name(name)
    }

    fn get_name_history(&self, name: &[u8]) -> Result<Option<NameHistory>, NameViewError> {
        if let Some(history) = self.names.get_history(name) {
            return Ok(Some(history.clone()));
        }
        self.base.get_name_history(name)
    }

    fn names_for_height(&self, height: u32) -> Result<BTreeSet<Name>, NameViewError> {
        let mut names = self.base.names_for_height(height)?;
        self.names.update_names_for_height(height, &mut names);
        Ok(names)
    }
}
