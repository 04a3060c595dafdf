//! Offline consistency audit of the name database.
//!
//! Re-derives the live-names set from the UTXO rows and cross-checks it
//! against the name index and the expiry index.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use nmcd_consensus::ChainParams;
use nmcd_script::names::parse_name_script;
use nmcd_storage::{Column, KeyValueStore};

use nmcd_names::{is_expired, ExpireEntry, Name, NameData, NameViewError};

use crate::state::{ChainState, ChainStateError};
use crate::utxo::UtxoEntry;

/// Heights where the historic name-stealing incident left the UTXO set and
/// the name database out of step; mismatches there are expected.
const BUG_WINDOW_START: u32 = 139_000;
const BUG_WINDOW_END: u32 = 180_000;

#[derive(Clone, Copy, Debug, Default)]
pub struct AuditStats {
    pub unexpired_names: usize,
    pub total_names: usize,
}

#[derive(Debug)]
pub enum AuditError {
    Store(String),
    Interrupted,
    Mismatch(String),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::Store(message) => write!(f, "{message}"),
            AuditError::Interrupted => write!(f, "interrupted"),
            AuditError::Mismatch(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AuditError {}

struct ColumnScan<'a> {
    interrupt: &'a AtomicBool,
    interrupted: bool,
    mismatch: Option<String>,
}

impl<'a> ColumnScan<'a> {
    fn new(interrupt: &'a AtomicBool) -> Self {
        Self {
            interrupt,
            interrupted: false,
            mismatch: None,
        }
    }

    fn step(&mut self) -> bool {
        if self.interrupted || self.mismatch.is_some() {
            return false;
        }
        if self.interrupt.load(Ordering::Relaxed) {
            self.interrupted = true;
            return false;
        }
        true
    }

    fn fail(&mut self, message: String) {
        if self.mismatch.is_none() {
            self.mismatch = Some(message);
        }
    }

    fn finish(self) -> Result<(), AuditError> {
        if self.interrupted {
            return Err(AuditError::Interrupted);
        }
        if let Some(message) = self.mismatch {
            return Err(AuditError::Mismatch(message));
        }
        Ok(())
    }
}

/// Full-keyspace audit at the given tip height.
pub fn validate_name_db<S: KeyValueStore>(
    store: &S,
    tip_height: u32,
    params: &ChainParams,
    interrupt: &AtomicBool,
) -> Result<AuditStats, AuditError> {
    let mut names_in_utxo: BTreeSet<Name> = BTreeSet::new();
    let mut heights_in_rows: BTreeMap<Name, u32> = BTreeMap::new();
    let mut heights_in_index: BTreeMap<Name, u32> = BTreeMap::new();
    let mut unexpired: BTreeSet<Name> = BTreeSet::new();

    let mut scan = ColumnScan::new(interrupt);
    store
        .for_each_prefix(Column::Utxo, &[], &mut |_key, value| {
            if !scan.step() {
                return Ok(());
            }
            let Ok(entry) = UtxoEntry::decode(value) else {
                scan.fail("invalid utxo row".to_string());
                return Ok(());
            };
            let Some(op) = parse_name_script(&entry.script_pubkey) else {
                return Ok(());
            };
            if !op.op.is_any_update() {
                return Ok(());
            }
            let name = op.op.name().unwrap_or_default().to_vec();
            if !names_in_utxo.insert(name.clone()) {
                scan.fail(format!(
                    "name {} duplicated in UTXO set",
                    String::from_utf8_lossy(&name)
                ));
            }
            Ok(())
        })
        .map_err(|err| AuditError::Store(err.to_string()))?;
    scan.finish()?;

    let mut scan = ColumnScan::new(interrupt);
    store
        .for_each_prefix(Column::Name, &[], &mut |key, value| {
            if !scan.step() {
                return Ok(());
            }
            let Ok(data) = NameData::decode(value) else {
                scan.fail("invalid name row".to_string());
                return Ok(());
            };
            heights_in_rows.insert(key.to_vec(), data.height);
            if !is_expired(data.height, tip_height, params) {
                unexpired.insert(key.to_vec());
            }
            Ok(())
        })
        .map_err(|err| AuditError::Store(err.to_string()))?;
    scan.finish()?;

    let mut scan = ColumnScan::new(interrupt);
    store
        .for_each_prefix(Column::NameExpiry, &[], &mut |key, _value| {
            if !scan.step() {
                return Ok(());
            }
            let Some(entry) = ExpireEntry::from_key(key) else {
                scan.fail("invalid expiry index key".to_string());
                return Ok(());
            };
            if heights_in_index
                .insert(entry.name.clone(), entry.height)
                .is_some()
            {
                scan.fail(format!(
                    "name {} duplicated in expiry index",
                    String::from_utf8_lossy(&entry.name)
                ));
            }
            Ok(())
        })
        .map_err(|err| AuditError::Store(err.to_string()))?;
    scan.finish()?;

    if heights_in_index != heights_in_rows {
        return Err(AuditError::Mismatch("name height data mismatch".to_string()));
    }
    if unexpired != names_in_utxo {
        return Err(AuditError::Mismatch(
            "names in UTXO mismatch names in the DB".to_string(),
        ));
    }

    Ok(AuditStats {
        unexpired_names: unexpired.len(),
        total_names: heights_in_rows.len(),
    })
}

/// Policy wrapper around the audit: honours the configured interval and the
/// known historic inconsistency window.  Returns whether the database
/// checked out (a tolerated mismatch inside the window yields `Ok(false)`).
pub fn check_name_db<S: KeyValueStore>(
    chainstate: &ChainState<S>,
    disconnect: bool,
    interrupt: &AtomicBool,
) -> Result<bool, ChainStateError> {
    let option = chainstate
        .options()
        .check_name_db
        .unwrap_or_else(|| chainstate.params().default_check_name_db());
    if option == -1 {
        return Ok(true);
    }

    let tip_height = chainstate
        .best_block()?
        .map(|tip| tip.height)
        .unwrap_or(0);
    if option > 0 && (disconnect || tip_height % option as u32 != 0) {
        return Ok(true);
    }

    match validate_name_db(chainstate.store(), tip_height, chainstate.params(), interrupt) {
        Ok(stats) => {
            nmcd_log::log_info!(
                "checked name database, {} unexpired names, {} total",
                stats.unexpired_names,
                stats.total_names,
            );
            Ok(true)
        }
        Err(AuditError::Mismatch(message)) => {
            nmcd_log::log_error!("name database is inconsistent: {message}");
            if (BUG_WINDOW_START..=BUG_WINDOW_END).contains(&tip_height) {
                nmcd_log::log_error!("this is expected due to historic name stealing");
                Ok(false)
            } else {
                Err(ChainStateError::CorruptIndex("name database is inconsistent"))
            }
        }
        Err(AuditError::Interrupted) => {
            Err(ChainStateError::View(NameViewError::Interrupted))
        }
        Err(AuditError::Store(message)) => Err(ChainStateError::Store(message)),
    }
}
