//! User-visible name query records.

use std::sync::atomic::AtomicBool;

use serde::Serialize;

use nmcd_consensus::{hash256_to_hex, ChainParams, Network};
use nmcd_primitives::address::script_pubkey_to_address;
use nmcd_storage::KeyValueStore;

use nmcd_names::{NameData, NameMempool};

use crate::state::{ChainState, ChainStateError};

/// Record shape shared by `name_show`, `name_history`, `name_scan` and
/// `name_filter`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NameInfo {
    pub name: String,
    pub value: String,
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub height: u32,
    pub expires_in: i64,
    pub expired: bool,
}

pub fn name_info(
    name: &[u8],
    data: &NameData,
    tip_height: u32,
    params: &ChainParams,
    network: Network,
) -> NameInfo {
    let address = script_pubkey_to_address(&data.address, network)
        .unwrap_or_else(|| "<nonstandard>".to_string());

    let expire_depth = params.name_expiration_depth(tip_height);
    let expires_in = i64::from(data.height) + i64::from(expire_depth) - i64::from(tip_height);

    NameInfo {
        name: String::from_utf8_lossy(name).into_owned(),
        value: String::from_utf8_lossy(&data.value).into_owned(),
        txid: hash256_to_hex(&data.prevout.hash),
        vout: data.prevout.index,
        address,
        height: data.height,
        expires_in,
        expired: expires_in <= 0,
    }
}

fn tip_height<S: KeyValueStore>(chainstate: &ChainState<S>) -> Result<u32, ChainStateError> {
    Ok(chainstate.best_block()?.map(|tip| tip.height).unwrap_or(0))
}

/// The current record for one name, if it exists.
pub fn name_show<S: KeyValueStore>(
    chainstate: &ChainState<S>,
    name: &[u8],
) -> Result<Option<NameInfo>, ChainStateError> {
    let Some(data) = chainstate.get_name(name)? else {
        return Ok(None);
    };
    let tip = tip_height(chainstate)?;
    Ok(Some(name_info(
        name,
        &data,
        tip,
        chainstate.params(),
        chainstate.params().network,
    )))
}

/// All recorded states of a name, oldest first, ending with the current one.
pub fn name_history<S: KeyValueStore>(
    chainstate: &ChainState<S>,
    name: &[u8],
) -> Result<Vec<NameInfo>, ChainStateError> {
    let tip = tip_height(chainstate)?;
    let params = chainstate.params();
    let network = params.network;

    let mut infos = Vec::new();
    if let Some(history) = chainstate.get_name_history(name)? {
        for entry in history.entries() {
            infos.push(name_info(name, entry, tip, params, network));
        }
    }
    if let Some(current) = chainstate.get_name(name)? {
        infos.push(name_info(name, &current, tip, params, network));
    }
    Ok(infos)
}

/// Up to `count` names starting at `start` in key order.
pub fn name_scan<S: KeyValueStore>(
    chainstate: &ChainState<S>,
    start: &[u8],
    count: usize,
    interrupt: &AtomicBool,
) -> Result<Vec<NameInfo>, ChainStateError> {
    let tip = tip_height(chainstate)?;
    let params = chainstate.params().clone();
    let network = params.network;

    let mut infos = Vec::new();
    chainstate.walk_names(start, interrupt, |name, data| {
        if infos.len() >= count {
            return false;
        }
        infos.push(name_info(name, data, tip, &params, network));
        infos.len() < count
    })?;
    Ok(infos)
}

/// Names whose key contains `pattern` as a byte substring, up to `max`
/// results (0 means unlimited).
pub fn name_filter<S: KeyValueStore>(
    chainstate: &ChainState<S>,
    pattern: &[u8],
    max: usize,
    interrupt: &AtomicBool,
) -> Result<Vec<NameInfo>, ChainStateError> {
    let tip = tip_height(chainstate)?;
    let params = chainstate.params().clone();
    let network = params.network;

    let mut infos = Vec::new();
    chainstate.walk_names(b"", interrupt, |name, data| {
        if contains(name, pattern) {
            infos.push(name_info(name, data, tip, &params, network));
        }
        max == 0 || infos.len() < max
    })?;
    Ok(infos)
}

/// Pending name operation as reported by `name_pending`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PendingNameOp {
    pub name: String,
    pub txid: String,
    pub op: &'static str,
}

/// Registrations and updates waiting in the pool.
pub fn name_pending(pool: &NameMempool) -> Vec<PendingNameOp> {
    let mut ops = Vec::new();
    for (name, txid) in pool.pending_registrations() {
        ops.push(PendingNameOp {
            name: String::from_utf8_lossy(name).into_owned(),
            txid: hash256_to_hex(txid),
            op: "name_firstupdate",
        });
    }
    for (name, txid) in pool.pending_updates() {
        ops.push(PendingNameOp {
            name: String::from_utf8_lossy(name).into_owned(),
            txid: hash256_to_hex(txid),
            op: "name_update",
        });
    }
    ops.sort_by(|a, b| (&a.name, &a.txid).cmp(&(&b.name, &b.txid)));
    ops
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
