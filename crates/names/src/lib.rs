//! The name state engine: records, caches, validation, block application,
//! and the mempool-side conflict tracker.

pub mod apply;
pub mod cache;
pub mod check;
pub mod data;
pub mod db;
pub mod mempool;
pub mod view;

pub use apply::{
    apply_name_transaction, expire_names, unexpire_names, ApplyError, ExpiredCoin, NameTxUndo,
};
pub use cache::{ExpireEntry, NameCache};
pub use check::{check_name_transaction, NameCheckError, NAME_CHECK_MEMPOOL};
pub use data::{is_expired, Name, NameData, NameHistory};
pub use db::NameDb;
pub use mempool::{NameMempool, NamePoolEntry};
pub use view::{Coin, EmptyView, NameStateCache, NameView, NameViewError};
