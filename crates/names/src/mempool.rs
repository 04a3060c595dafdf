//! Name component of the transaction mempool.
//!
//! Tracks pending name operations so no two pool transactions collide on a
//! commitment, a registration, or an update.  The structure is owned by the
//! surrounding pool and must only be touched under its lock; exclusive
//! access is what the `&mut` receivers encode.

use std::collections::{BTreeSet, HashMap};

use nmcd_consensus::{ChainParams, Hash256};
use nmcd_primitives::transaction::Transaction;
use nmcd_script::names::{parse_name_script, NameOp};

use crate::data::{is_expired, Name};
use crate::view::NameView;

/// Name-relevant slice of a pool entry: the transaction's single name
/// operation, if it has one.
#[derive(Clone, Debug)]
pub struct NamePoolEntry {
    pub txid: Hash256,
    name_op: Option<NameOp>,
}

impl NamePoolEntry {
    pub fn new(txid: Hash256, tx: &Transaction) -> Self {
        let name_op = tx
            .vout
            .iter()
            .find_map(|output| parse_name_script(&output.script_pubkey))
            .map(|script| script.op);
        Self { txid, name_op }
    }

    pub fn is_name_new(&self) -> bool {
        matches!(self.name_op, Some(NameOp::NameNew { .. }))
    }

    pub fn is_name_registration(&self) -> bool {
        matches!(self.name_op, Some(NameOp::NameFirstUpdate { .. }))
    }

    pub fn is_name_update(&self) -> bool {
        matches!(self.name_op, Some(NameOp::NameUpdate { .. }))
    }

    pub fn new_hash(&self) -> Option<&[u8]> {
        match &self.name_op {
            Some(NameOp::NameNew { hash }) => Some(hash.as_slice()),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&[u8]> {
        self.name_op.as_ref().and_then(|op| op.name())
    }
}

/// Reverse indices over the pool's pending name operations.
#[derive(Debug, Default)]
pub struct NameMempool {
    /// Pending commitments by commitment hash.
    map_name_news: HashMap<Vec<u8>, Hash256>,
    /// Pending registrations by name.
    map_name_regs: HashMap<Name, Hash256>,
    /// Pending updates by name.  One pending update per name is a policy
    /// restriction, not a consensus rule.
    map_name_updates: HashMap<Name, Hash256>,
}

impl NameMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.map_name_news.clear();
        self.map_name_regs.clear();
        self.map_name_updates.clear();
    }

    pub fn registers_name(&self, name: &[u8]) -> bool {
        self.map_name_regs.contains_key(name)
    }

    pub fn updates_name(&self, name: &[u8]) -> bool {
        self.map_name_updates.contains_key(name)
    }

    pub fn pending_registration(&self, name: &[u8]) -> Option<Hash256> {
        self.map_name_regs.get(name).copied()
    }

    pub fn pending_update(&self, name: &[u8]) -> Option<Hash256> {
        self.map_name_updates.get(name).copied()
    }

    pub fn pending_registrations(&self) -> impl Iterator<Item = (&Name, &Hash256)> {
        self.map_name_regs.iter()
    }

    pub fn pending_updates(&self) -> impl Iterator<Item = (&Name, &Hash256)> {
        self.map_name_updates.iter()
    }

    /// Whether `tx` can join the pool without colliding with a pending name
    /// operation.  Never errors; shape problems are the validator's job.
    pub fn check_tx(&self, tx: &Transaction) -> bool {
        if !tx.is_name_tx() {
            return true;
        }

        for output in &tx.vout {
            let Some(script) = parse_name_script(&output.script_pubkey) else {
                continue;
            };
            match &script.op {
                NameOp::NameNew { hash } => {
                    if let Some(existing) = self.map_name_news.get(hash.as_slice()) {
                        if *existing != tx.txid() {
                            return false;
                        }
                    }
                }
                NameOp::NameFirstUpdate { name, .. } => {
                    if self.registers_name(name) {
                        return false;
                    }
                }
                NameOp::NameUpdate { name, .. } => {
                    if self.updates_name(name) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Index an entry that already passed `check_tx`.
    pub fn add_unchecked(&mut self, entry: &NamePoolEntry) {
        if let Some(hash) = entry.new_hash() {
            match self.map_name_news.get(hash) {
                Some(existing) => debug_assert_eq!(*existing, entry.txid),
                None => {
                    self.map_name_news.insert(hash.to_vec(), entry.txid);
                }
            }
        }

        if entry.is_name_registration() {
            let name = entry.name().unwrap_or_default();
            debug_assert!(!self.map_name_regs.contains_key(name));
            self.map_name_regs.insert(name.to_vec(), entry.txid);
        }

        if entry.is_name_update() {
            let name = entry.name().unwrap_or_default();
            debug_assert!(!self.map_name_updates.contains_key(name));
            self.map_name_updates.insert(name.to_vec(), entry.txid);
        }
    }

    /// Drop an entry that is leaving the pool.
    pub fn remove(&mut self, entry: &NamePoolEntry) {
        if let Some(hash) = entry.new_hash() {
            if self.map_name_news.get(hash) == Some(&entry.txid) {
                self.map_name_news.remove(hash);
            }
        }
        if entry.is_name_registration() {
            self.map_name_regs.remove(entry.name().unwrap_or_default());
        }
        if entry.is_name_update() {
            self.map_name_updates
                .remove(entry.name().unwrap_or_default());
        }
    }

    /// Pool transactions that register a name which `tx` also registers.
    /// Called when a block or peer transaction supersedes pool entries; the
    /// caller evicts the returned transactions (and their index entries via
    /// `remove`).
    pub fn remove_conflicts(&self, tx: &Transaction) -> Vec<Hash256> {
        let mut evict = Vec::new();
        if !tx.is_name_tx() {
            return evict;
        }
        for output in &tx.vout {
            let Some(script) = parse_name_script(&output.script_pubkey) else {
                continue;
            };
            if let NameOp::NameFirstUpdate { name, .. } = &script.op {
                if let Some(txid) = self.map_name_regs.get(name.as_slice()) {
                    if *txid != tx.txid() {
                        evict.push(*txid);
                    }
                }
            }
        }
        evict
    }

    /// Pending registrations invalidated because their names came back to
    /// life in a chain disconnect.
    pub fn remove_unexpire_conflicts(&self, unexpired: &BTreeSet<Name>) -> Vec<Hash256> {
        unexpired
            .iter()
            .filter_map(|name| self.map_name_regs.get(name.as_slice()).copied())
            .collect()
    }

    /// Pending updates invalidated because their names expired.
    pub fn remove_expire_conflicts(&self, expired: &BTreeSet<Name>) -> Vec<Hash256> {
        expired
            .iter()
            .filter_map(|name| self.map_name_updates.get(name.as_slice()).copied())
            .collect()
    }

    /// Cross-check every pool entry against the indices and the chain view.
    /// `tip_height` is the current best height; pending operations are
    /// judged at `tip_height + 1`, where they would actually be mined.
    pub fn consistency_check<'a, I>(
        &self,
        entries: I,
        view: &dyn NameView,
        tip_height: u32,
        params: &ChainParams,
    ) -> Result<(), String>
    where
        I: IntoIterator<Item = &'a NamePoolEntry>,
    {
        let mine_height = tip_height.saturating_add(1);
        let mut seen_regs: BTreeSet<Name> = BTreeSet::new();
        let mut seen_updates: BTreeSet<Name> = BTreeSet::new();

        for entry in entries {
            if entry.is_name_new() {
                let hash = entry.new_hash().unwrap_or_default();
                match self.map_name_news.get(hash) {
                    Some(txid) if *txid == entry.txid => {}
                    Some(_) => return Err("commitment indexed under wrong tx".to_string()),
                    None => return Err("commitment missing from index".to_string()),
                }
            }

            if entry.is_name_registration() {
                let name = entry.name().unwrap_or_default();
                match self.map_name_regs.get(name) {
                    Some(txid) if *txid == entry.txid => {}
                    Some(_) => return Err("registration indexed under wrong tx".to_string()),
                    None => return Err("registration missing from index".to_string()),
                }
                if !seen_regs.insert(name.to_vec()) {
                    return Err("duplicate pending registration".to_string());
                }
                if let Some(data) = view
                    .get_name(name)
                    .map_err(|err| err.to_string())?
                {
                    if !is_expired(data.height, mine_height, params) {
                        return Err("pending registration of a live name".to_string());
                    }
                }
            }

            if entry.is_name_update() {
                let name = entry.name().unwrap_or_default();
                match self.map_name_updates.get(name) {
                    Some(txid) if *txid == entry.txid => {}
                    Some(_) => return Err("update indexed under wrong tx".to_string()),
                    None => return Err("update missing from index".to_string()),
                }
                if !seen_updates.insert(name.to_vec()) {
                    return Err("duplicate pending update".to_string());
                }
                let data = view
                    .get_name(name)
                    .map_err(|err| err.to_string())?
                    .ok_or_else(|| "pending update of a nonexistent name".to_string())?;
                if is_expired(data.height, mine_height, params) {
                    return Err("pending update of an expired name".to_string());
                }
            }
        }

        if seen_regs.len() != self.map_name_regs.len() {
            return Err("registration index has stale entries".to_string());
        }
        if seen_updates.len() != self.map_name_updates.len() {
            return Err("update index has stale entries".to_string());
        }

        Ok(())
    }
}
