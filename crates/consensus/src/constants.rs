//! Consensus-wide constants shared across validation.

/// The maximum allowed length of a name key, in bytes (network rule).
pub const MAX_NAME_LENGTH: usize = 255;
/// The maximum allowed length of a name value, in bytes (network rule).
pub const MAX_VALUE_LENGTH: usize = 1023;
/// Softer value cap applied by user-facing tooling, not by consensus.
pub const MAX_VALUE_LENGTH_UI: usize = 520;
/// The maximum allowed length of a commit-reveal salt, in bytes.
pub const MAX_RAND_LENGTH: usize = 20;
/// Commitment hashes carried by registration commitments are hash160 outputs.
pub const NAME_NEW_HASH_LENGTH: usize = 20;
/// Minimum confirmations between a commitment and the reveal that spends it.
pub const MIN_FIRSTUPDATE_DEPTH: u32 = 12;

/// Sentinel height for coins created by unconfirmed transactions.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// Transaction version marking a name transaction.
pub const NAME_TX_VERSION: i32 = 0x7100;

/// Block version flag signalling a merged-mining proof in the header.
pub const VERSION_AUXPOW: i32 = 1 << 8;
/// Low bits of the block version that carry the base version number.
pub const VERSION_BASE_MASK: i32 = 0xff;
/// Shift for the merged-mining chain ID stored in the high version bits.
pub const VERSION_CHAIN_SHIFT: u32 = 16;

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: u32 = 100;
