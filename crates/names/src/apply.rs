//! Applying and undoing name operations at block granularity.

use std::collections::BTreeSet;
use std::fmt;

use nmcd_consensus::{BugType, ChainParams, Hash256};
use nmcd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use nmcd_primitives::outpoint::OutPoint;
use nmcd_primitives::transaction::Transaction;
use nmcd_script::names::parse_name_script;

use crate::data::{is_expired, Name, NameData};
use crate::view::{Coin, NameStateCache, NameView, NameViewError};

/// The name stolen in the historic demonstration; its coin was already
/// spent when it came up for expiration.
const STOLEN_NAME: &[u8] = b"d/postmortem";
const STOLEN_NAME_HEIGHT: u32 = 175_868;

#[derive(Debug)]
pub enum ApplyError {
    View(NameViewError),
    /// Block-level inconsistency; the chain must not advance past it.
    Inconsistent(&'static str),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::View(err) => write!(f, "{err}"),
            ApplyError::Inconsistent(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ApplyError {}

impl From<NameViewError> for ApplyError {
    fn from(err: NameViewError) -> Self {
        ApplyError::View(err)
    }
}

/// Undo record for one applied name operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NameTxUndo {
    pub name: Name,
    pub is_new: bool,
    pub old_data: Option<NameData>,
}

impl NameTxUndo {
    /// Capture the state being overwritten for `name`.
    pub fn from_old_state(name: &[u8], view: &dyn NameView) -> Result<Self, NameViewError> {
        let old_data = view.get_name(name)?;
        Ok(Self {
            name: name.to_vec(),
            is_new: old_data.is_none(),
            old_data,
        })
    }

    /// Revert the operation on the given view.
    pub fn apply(&self, state: &mut NameStateCache<'_>) -> Result<(), ApplyError> {
        match (&self.old_data, self.is_new) {
            (_, true) => state.delete_name(&self.name)?,
            (Some(old), false) => state.set_name_undo(&self.name, old.clone())?,
            (None, false) => {
                return Err(ApplyError::Inconsistent("name undo record without old data"))
            }
        }
        Ok(())
    }
}

impl Encodable for NameTxUndo {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.name);
        encoder.write_bool(self.is_new);
        if let Some(old) = &self.old_data {
            old.consensus_encode(encoder);
        }
    }
}

impl Decodable for NameTxUndo {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let name = decoder.read_var_bytes()?;
        let is_new = decoder.read_bool()?;
        let old_data = if is_new {
            None
        } else {
            Some(NameData::consensus_decode(decoder)?)
        };
        Ok(Self {
            name,
            is_new,
            old_data,
        })
    }
}

/// A name coin spent by expiration, retained so disconnection can
/// reinstate it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExpiredCoin {
    pub outpoint: OutPoint,
    pub coin: Coin,
}

impl Encodable for ExpiredCoin {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.outpoint.consensus_encode(encoder);
        encoder.write_i64_le(self.coin.value);
        encoder.write_var_bytes(&self.coin.script_pubkey);
        encoder.write_u32_le(self.coin.height);
    }
}

impl Decodable for ExpiredCoin {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let outpoint = OutPoint::consensus_decode(decoder)?;
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        Ok(Self {
            outpoint,
            coin: Coin {
                value,
                script_pubkey,
                height,
            },
        })
    }
}

/// Record a connected transaction's name changes into the view, pushing one
/// undo entry per touched name.
pub fn apply_name_transaction(
    tx: &Transaction,
    txid: &Hash256,
    height: u32,
    state: &mut NameStateCache<'_>,
    undo: &mut Vec<NameTxUndo>,
    params: &ChainParams,
) -> Result<(), ApplyError> {
    /* Historic relics that must not reach the name database.  Burnt outputs
       keep the UTXO set consistent with what the historic client produced.  */
    if let Some(bug) = params.is_historic_bug(txid, height) {
        if bug != BugType::FullyApply {
            if bug == BugType::IgnoreMarkUnspendable {
                for (index, output) in tx.vout.iter().enumerate() {
                    let Some(op) = parse_name_script(&output.script_pubkey) else {
                        continue;
                    };
                    if !op.op.is_any_update() {
                        continue;
                    }
                    let outpoint = OutPoint {
                        hash: *txid,
                        index: index as u32,
                    };
                    if state.spend_coin(&outpoint)?.is_none() {
                        nmcd_log::log_error!("spending buggy name output failed");
                    }
                }
            }
            return Ok(());
        }
    }

    /* Some of the buggy transactions above do not carry the name version
       marker, which is why this test runs after the bug handling.  */
    if !tx.is_name_tx() {
        return Ok(());
    }

    for (index, output) in tx.vout.iter().enumerate() {
        let Some(op) = parse_name_script(&output.script_pubkey) else {
            continue;
        };
        if !op.op.is_any_update() {
            continue;
        }
        let name = op.op.name().unwrap_or_default().to_vec();
        nmcd_log::log_debug!(
            "updating name at height {height}: {}",
            String::from_utf8_lossy(&name)
        );

        undo.push(NameTxUndo::from_old_state(&name, state)?);

        let data = NameData::from_script(
            height,
            OutPoint {
                hash: *txid,
                index: index as u32,
            },
            &op,
        );
        state.set_name(&name, data)?;
    }

    Ok(())
}

/// Expire names whose update height falls out of the window when `height`
/// connects.  Spent coins go onto `expired_undo` and the dropped names are
/// returned so the mempool can evict conflicting updates.
pub fn expire_names(
    height: u32,
    state: &mut NameStateCache<'_>,
    expired_undo: &mut Vec<ExpiredCoin>,
    params: &ChainParams,
) -> Result<BTreeSet<Name>, ApplyError> {
    let mut names = BTreeSet::new();

    /* The genesis block contains no name expirations.  */
    if height == 0 {
        return Ok(names);
    }

    /* Find the update heights that fall out of reach with this block.  If
       the expiration depth changes, this can be several at once.  */
    let depth_old = params.name_expiration_depth(height - 1);
    let depth_now = params.name_expiration_depth(height);

    if depth_now > height {
        return Ok(names);
    }

    /* Both ends inclusive.  The previous block covered everything up to
       (height - 1) - depth_old; a growing depth can invert the window, in
       which case nothing expires here.  */
    let expire_from = height.saturating_sub(depth_old);
    let expire_to = height - depth_now;
    if expire_from > expire_to {
        return Ok(names);
    }

    for h in expire_from..=expire_to {
        names.extend(state.names_for_height(h)?);
    }

    for name in &names {
        let data = state
            .get_name(name)?
            .ok_or(ApplyError::Inconsistent("expiring name not in the database"))?;
        if !is_expired(data.height, height, params) {
            return Err(ApplyError::Inconsistent("expiring name is not actually expired"));
        }

        /* The stolen name's coin was spent long before it came up for
           expiration; skip it and leave the stale row alone.  The auditor
           tolerates the resulting mismatch in the affected height range.  */
        if height == STOLEN_NAME_HEIGHT && name.as_slice() == STOLEN_NAME {
            continue;
        }

        let outpoint = data.prevout.clone();
        let coin = state
            .spend_coin(&outpoint)?
            .ok_or(ApplyError::Inconsistent("name coin to be expired is unavailable"))?;

        let matches = parse_name_script(&coin.script_pubkey)
            .map(|op| op.op.is_any_update() && op.op.name() == Some(name.as_slice()))
            .unwrap_or(false);
        if !matches {
            return Err(ApplyError::Inconsistent("name coin to be expired has wrong script"));
        }

        expired_undo.push(ExpiredCoin { outpoint, coin });
        state.delete_name(name)?;
        nmcd_log::log_debug!(
            "expired name at height {height}: {}",
            String::from_utf8_lossy(name)
        );
    }

    Ok(names)
}

/// Reverse the expirations recorded for a block that is being disconnected.
/// Restores coins and live rows; returns the revived names so the mempool
/// can evict pending registrations.
pub fn unexpire_names(
    height: u32,
    expired_undo: &[ExpiredCoin],
    state: &mut NameStateCache<'_>,
    params: &ChainParams,
) -> Result<BTreeSet<Name>, ApplyError> {
    let mut names = BTreeSet::new();

    if height == 0 {
        return Ok(names);
    }

    for entry in expired_undo.iter().rev() {
        let op = parse_name_script(&entry.coin.script_pubkey)
            .filter(|op| op.op.is_any_update())
            .ok_or(ApplyError::Inconsistent("wrong script to be unexpired"))?;
        let name = op.op.name().unwrap_or_default().to_vec();

        if !names.insert(name.clone()) {
            return Err(ApplyError::Inconsistent("name unexpired twice"));
        }

        /* The record died exactly when this block connected: expired at
           `height`, alive one block earlier.  */
        if !is_expired(entry.coin.height, height, params)
            || is_expired(entry.coin.height, height - 1, params)
        {
            return Err(ApplyError::Inconsistent(
                "name to be unexpired did not expire at this height",
            ));
        }
        if let Some(existing) = state.get_name(&name)? {
            if !is_expired(existing.height, height, params) {
                return Err(ApplyError::Inconsistent("name to be unexpired is live"));
            }
        }

        let data = NameData::from_script(entry.coin.height, entry.outpoint.clone(), &op);
        state.restore_name(&name, data)?;
        state.add_coin(entry.outpoint.clone(), entry.coin.clone());
    }

    Ok(names)
}
