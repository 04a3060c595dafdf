//! Chain state transitions over the persistent store.
//!
//! Consensus is single-threaded: the surrounding chain driver serializes
//! connect/disconnect/validate behind one exclusive lock for the duration
//! of a block's application.  Methods here take `&self` and stay free of
//! interior blocking; the per-block caches live on the caller's frame.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nmcd_consensus::{hash256_to_hex, BugType, ChainParams, Hash256, ParamsError};
use nmcd_primitives::block::Block;
use nmcd_primitives::outpoint::OutPoint;
use nmcd_primitives::transaction::Transaction;
use nmcd_script::names::parse_name_script;
use nmcd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use nmcd_names::{
    apply_name_transaction, check_name_transaction, expire_names, unexpire_names, ApplyError,
    Coin, Name, NameCheckError, NameData, NameDb, NameHistory, NameStateCache, NameTxUndo,
    NameView, NameViewError, NAME_CHECK_MEMPOOL,
};

use crate::index::{ChainIndex, ChainTip};
use crate::undo::{BlockUndo, SpentOutput};
use crate::utxo::{UtxoEntry, UtxoSet};

const NAME_HISTORY_FLAG: &[u8] = b"name_history";

#[derive(Clone, Copy, Debug, Default)]
pub struct ChainOptions {
    /// Record superseded name records in the history table.
    pub name_history: bool,
    /// Override for the audit interval; `None` uses the network default.
    pub check_name_db: Option<i32>,
}

#[derive(Debug)]
pub enum ChainStateError {
    Store(String),
    Params(ParamsError),
    InvalidBlock(&'static str),
    MissingInput,
    CorruptIndex(&'static str),
    Validation { txid: Hash256, error: NameCheckError },
    Apply(ApplyError),
    View(NameViewError),
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::Store(message) => write!(f, "{message}"),
            ChainStateError::Params(err) => write!(f, "{err}"),
            ChainStateError::InvalidBlock(message) => write!(f, "{message}"),
            ChainStateError::MissingInput => write!(f, "input coin missing"),
            ChainStateError::CorruptIndex(message) => write!(f, "{message}"),
            ChainStateError::Validation { txid, error } => {
                write!(f, "invalid tx {}: {error}", hash256_to_hex(txid))
            }
            ChainStateError::Apply(err) => write!(f, "{err}"),
            ChainStateError::View(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err.to_string())
    }
}

impl From<ParamsError> for ChainStateError {
    fn from(err: ParamsError) -> Self {
        ChainStateError::Params(err)
    }
}

impl From<ApplyError> for ChainStateError {
    fn from(err: ApplyError) -> Self {
        ChainStateError::Apply(err)
    }
}

impl From<NameViewError> for ChainStateError {
    fn from(err: NameViewError) -> Self {
        ChainStateError::View(err)
    }
}

/// Store-backed implementation of the engine's read capabilities.
pub(crate) struct DbView<'a, S: KeyValueStore> {
    utxos: &'a UtxoSet<Arc<S>>,
    names: &'a NameDb<Arc<S>>,
}

impl<S: KeyValueStore> NameView for DbView<'_, S> {
    fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError> {
        Ok(self.utxos.get(outpoint)?.map(|entry| entry.to_coin()))
    }

    fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, NameViewError> {
        self.names.get_name(name)
    }

    fn get_name_history(&self, name: &[u8]) -> Result<Option<NameHistory>, NameViewError> {
        self.names.get_history(name)
    }

    fn names_for_height(&self, height: u32) -> Result<BTreeSet<Name>, NameViewError> {
        self.names.get_names_for_height(height)
    }
}

pub struct ConnectOutcome {
    pub batch: WriteBatch,
    /// Names dropped by expiration; the mempool evicts their pending updates.
    pub expired: BTreeSet<Name>,
}

pub struct DisconnectOutcome {
    pub batch: WriteBatch,
    /// Names revived by the disconnect; the mempool evicts their pending
    /// registrations.
    pub unexpired: BTreeSet<Name>,
}

#[derive(Debug)]
pub struct ChainState<S> {
    store: Arc<S>,
    params: ChainParams,
    options: ChainOptions,
    utxos: UtxoSet<Arc<S>>,
    names: NameDb<Arc<S>>,
    index: ChainIndex<S>,
}

impl<S: KeyValueStore> ChainState<S> {
    pub fn new(store: Arc<S>, params: ChainParams) -> Result<Self, ChainStateError> {
        Self::with_options(store, params, ChainOptions::default())
    }

    pub fn with_options(
        store: Arc<S>,
        params: ChainParams,
        options: ChainOptions,
    ) -> Result<Self, ChainStateError> {
        params.check_expiration_monotonicity()?;

        /* The history table only makes sense when it has been maintained
           from genesis; a flag row pins the choice.  */
        match store.get(Column::Flags, NAME_HISTORY_FLAG)? {
            Some(stored) => {
                let enabled = stored.as_slice() == b"1";
                if enabled != options.name_history {
                    return Err(ChainStateError::CorruptIndex(
                        "name history flag mismatch; reindex required",
                    ));
                }
            }
            None => {
                store.put(
                    Column::Flags,
                    NAME_HISTORY_FLAG,
                    if options.name_history { b"1" } else { b"0" },
                )?;
            }
        }

        Ok(Self {
            utxos: UtxoSet::new(Arc::clone(&store)),
            names: NameDb::new(Arc::clone(&store)),
            index: ChainIndex::new(Arc::clone(&store)),
            store,
            params,
            options,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn best_block(&self) -> Result<Option<ChainTip>, ChainStateError> {
        Ok(self.index.best_block()?)
    }

    pub fn height_hash(&self, height: u32) -> Result<Option<Hash256>, ChainStateError> {
        Ok(self.index.height_hash(height)?)
    }

    pub fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, ChainStateError> {
        Ok(self.names.get_name(name)?)
    }

    pub fn get_name_history(&self, name: &[u8]) -> Result<Option<NameHistory>, ChainStateError> {
        Ok(self.names.get_history(name)?)
    }

    pub fn get_names_for_height(&self, height: u32) -> Result<BTreeSet<Name>, ChainStateError> {
        Ok(self.names.get_names_for_height(height)?)
    }

    pub fn walk_names<F>(
        &self,
        start: &[u8],
        interrupt: &AtomicBool,
        visitor: F,
    ) -> Result<(), ChainStateError>
    where
        F: FnMut(&[u8], &NameData) -> bool,
    {
        Ok(self.names.walk_names(start, interrupt, visitor)?)
    }

    pub fn utxo_entry(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainStateError> {
        Ok(self.utxos.get(outpoint)?)
    }

    /// Validate a transaction for mempool admission: judged at the height
    /// where it would be mined, with the commitment-maturity exemption.
    pub fn check_pool_transaction(&self, tx: &Transaction) -> Result<(), NameCheckError> {
        let tip_height = self
            .index
            .best_block()
            .map_err(|err| NameCheckError::View(err.to_string()))?
            .map(|tip| tip.height)
            .unwrap_or(0);
        let view = DbView {
            utxos: &self.utxos,
            names: &self.names,
        };
        check_name_transaction(
            tx,
            tip_height.saturating_add(1),
            &view,
            &self.params,
            NAME_CHECK_MEMPOOL,
        )
    }

    /// Connect `block` at `height` on top of the current tip.  Walks the
    /// transactions through the validator and applicator in block order,
    /// runs expiration, and returns the assembled store batch together with
    /// the expired names.  Nothing is written until the caller commits.
    pub fn connect_block(
        &self,
        block: &Block,
        height: u32,
    ) -> Result<ConnectOutcome, ChainStateError> {
        let hash = block.header.hash();

        match self.index.best_block()? {
            Some(tip) => {
                if block.header.prev_block != tip.hash {
                    return Err(ChainStateError::InvalidBlock(
                        "block does not extend best block tip",
                    ));
                }
                if height != tip.height + 1 {
                    return Err(ChainStateError::InvalidBlock(
                        "block height does not follow the tip",
                    ));
                }
            }
            None => {
                if height != 0 {
                    return Err(ChainStateError::InvalidBlock(
                        "missing best block for non-genesis height",
                    ));
                }
            }
        }
        if block.transactions.is_empty() {
            return Err(ChainStateError::InvalidBlock("block has no transactions"));
        }

        let base = DbView {
            utxos: &self.utxos,
            names: &self.names,
        };
        let mut state = NameStateCache::new(&base, self.options.name_history);
        let mut name_undo: Vec<NameTxUndo> = Vec::new();
        let mut spent: Vec<SpentOutput> = Vec::new();
        let mut entry_overrides: HashMap<OutPoint, UtxoEntry> = HashMap::new();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            let is_coinbase = tx_index == 0;
            if is_coinbase != tx.is_coinbase() {
                return Err(ChainStateError::InvalidBlock(
                    "coinbase must be the first transaction and only that",
                ));
            }

            if !is_coinbase {
                check_name_transaction(tx, height, &state, &self.params, 0)
                    .map_err(|error| ChainStateError::Validation { txid, error })?;

                for input in &tx.vin {
                    if state.spend_coin(&input.prevout)?.is_none() {
                        nmcd_log::log_warn!(
                            "missing input for tx {} prevout {}:{} at height {height}",
                            hash256_to_hex(&txid),
                            hash256_to_hex(&input.prevout.hash),
                            input.prevout.index,
                        );
                        return Err(ChainStateError::MissingInput);
                    }
                    let entry = match entry_overrides.remove(&input.prevout) {
                        Some(entry) => entry,
                        None => self
                            .utxos
                            .get(&input.prevout)?
                            .ok_or(ChainStateError::CorruptIndex("utxo row vanished"))?,
                    };
                    spent.push(SpentOutput {
                        outpoint: input.prevout.clone(),
                        entry,
                    });
                }
            }

            for (vout_index, output) in tx.vout.iter().enumerate() {
                let outpoint = OutPoint {
                    hash: txid,
                    index: vout_index as u32,
                };
                let entry = UtxoEntry {
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    height,
                    is_coinbase,
                };
                state.add_coin(outpoint.clone(), entry.to_coin());
                entry_overrides.insert(outpoint, entry);
            }

            apply_name_transaction(tx, &txid, height, &mut state, &mut name_undo, &self.params)?;
        }

        let mut expired_undo = Vec::new();
        let expired = expire_names(height, &mut state, &mut expired_undo, &self.params)?;

        let mut batch = WriteBatch::new();
        let (name_cache, coin_ops) = state.into_parts();
        batch.reserve(coin_ops.len() + 8);
        for (outpoint, op) in coin_ops {
            match op {
                Some(coin) => {
                    let entry = entry_overrides
                        .remove(&outpoint)
                        .unwrap_or_else(|| UtxoEntry::from_coin(coin));
                    self.utxos.put(&mut batch, &outpoint, &entry);
                }
                None => self.utxos.delete(&mut batch, &outpoint),
            }
        }
        self.names
            .write_cache(&mut batch, &name_cache, self.options.name_history);

        let undo = BlockUndo {
            spent,
            name_ops: name_undo,
            expired: expired_undo,
        };
        batch.put(Column::BlockUndo, hash, undo.encode());
        self.index.set_best_block(&mut batch, &ChainTip { hash, height });
        self.index.set_height_hash(&mut batch, height, &hash);

        nmcd_log::log_debug!(
            "connected block {} at height {height} ({} tx, {} expired names)",
            hash256_to_hex(&hash),
            block.transactions.len(),
            expired.len(),
        );

        Ok(ConnectOutcome { batch, expired })
    }

    /// Disconnect the tip block.  The block itself comes from the caller's
    /// block storage; undo data comes from the store.  Expirations are
    /// reversed first, then the transactions in reverse order.
    pub fn disconnect_block(&self, block: &Block) -> Result<DisconnectOutcome, ChainStateError> {
        let hash = block.header.hash();
        let tip = self
            .index
            .best_block()?
            .ok_or(ChainStateError::InvalidBlock("missing best block for disconnect"))?;
        if tip.hash != hash {
            return Err(ChainStateError::InvalidBlock(
                "block does not match best block tip",
            ));
        }
        let height = tip.height;

        let undo_bytes = self
            .store
            .get(Column::BlockUndo, &hash)?
            .ok_or(ChainStateError::CorruptIndex(
                "missing block undo entry; resync required",
            ))?;
        let mut undo = BlockUndo::decode(&undo_bytes)
            .map_err(|_| ChainStateError::CorruptIndex("invalid block undo entry"))?;

        let base = DbView {
            utxos: &self.utxos,
            names: &self.names,
        };
        let mut state = NameStateCache::new(&base, self.options.name_history);
        let mut entry_overrides: HashMap<OutPoint, UtxoEntry> = HashMap::new();

        let unexpired = unexpire_names(height, &undo.expired, &mut state, &self.params)?;

        let mut name_undos = undo.name_ops;
        for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
            let txid = tx.txid();

            /* Reverse the name operations this transaction applied.  Bug
               dispositions other than full application never touched the
               name database, so they consume no undo entries.  */
            let applies_names = match self.params.is_historic_bug(&txid, height) {
                Some(BugType::FullyApply) | None => tx.is_name_tx(),
                Some(_) => false,
            };
            if applies_names {
                for output in tx.vout.iter().rev() {
                    let Some(op) = parse_name_script(&output.script_pubkey) else {
                        continue;
                    };
                    if !op.op.is_any_update() {
                        continue;
                    }
                    let undo_entry = name_undos.pop().ok_or(ChainStateError::CorruptIndex(
                        "block undo name entry missing",
                    ))?;
                    if Some(undo_entry.name.as_slice()) != op.op.name() {
                        return Err(ChainStateError::CorruptIndex("block undo name mismatch"));
                    }
                    undo_entry.apply(&mut state)?;
                }
            }

            for vout_index in 0..tx.vout.len() {
                state.remove_coin(&OutPoint {
                    hash: txid,
                    index: vout_index as u32,
                });
            }

            if tx_index != 0 {
                for input in tx.vin.iter().rev() {
                    let spent = undo.spent.pop().ok_or(ChainStateError::CorruptIndex(
                        "block undo input mismatch",
                    ))?;
                    if spent.outpoint != input.prevout {
                        return Err(ChainStateError::CorruptIndex(
                            "block undo outpoint mismatch",
                        ));
                    }
                    state.add_coin(spent.outpoint.clone(), spent.entry.to_coin());
                    entry_overrides.insert(spent.outpoint.clone(), spent.entry.clone());
                }
            }
        }

        if !undo.spent.is_empty() {
            return Err(ChainStateError::CorruptIndex(
                "block undo has extra spent entries",
            ));
        }
        if !name_undos.is_empty() {
            return Err(ChainStateError::CorruptIndex(
                "block undo has extra name entries",
            ));
        }

        let mut batch = WriteBatch::new();
        let (name_cache, coin_ops) = state.into_parts();
        batch.reserve(coin_ops.len() + 8);
        for (outpoint, op) in coin_ops {
            match op {
                Some(coin) => {
                    let entry = entry_overrides
                        .remove(&outpoint)
                        .unwrap_or_else(|| UtxoEntry::from_coin(coin));
                    self.utxos.put(&mut batch, &outpoint, &entry);
                }
                None => self.utxos.delete(&mut batch, &outpoint),
            }
        }
        self.names
            .write_cache(&mut batch, &name_cache, self.options.name_history);

        batch.delete(Column::BlockUndo, hash);
        self.index.clear_height_hash(&mut batch, height);
        if height == 0 {
            self.index.clear_best_block(&mut batch);
        } else {
            self.index.set_best_block(
                &mut batch,
                &ChainTip {
                    hash: block.header.prev_block,
                    height: height - 1,
                },
            );
        }

        nmcd_log::log_debug!(
            "disconnected block {} at height {height} ({} revived names)",
            hash256_to_hex(&hash),
            unexpired.len(),
        );

        Ok(DisconnectOutcome { batch, unexpired })
    }

    pub fn commit_batch(&self, batch: WriteBatch) -> Result<(), ChainStateError> {
        Ok(self.store.write_batch(&batch)?)
    }
}
