//! Chain state: UTXO rows, undo records, and the block connect/disconnect
//! pipeline that drives the name engine.

pub mod audit;
pub mod index;
pub mod query;
pub mod state;
pub mod undo;
pub mod utxo;

pub use audit::{check_name_db, validate_name_db, AuditError, AuditStats};
pub use index::{ChainIndex, ChainTip};
pub use query::{
    name_filter, name_history, name_info, name_pending, name_scan, name_show, NameInfo,
    PendingNameOp,
};
pub use state::{ChainOptions, ChainState, ChainStateError, ConnectOutcome, DisconnectOutcome};
pub use undo::{BlockUndo, SpentOutput};
pub use utxo::{outpoint_key_bytes, OutPointKey, UtxoEntry, UtxoSet};
