//! Chain parameter definitions.

use std::collections::BTreeMap;

use crate::money::{Amount, CENT};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Disposition of a transaction listed in the historic-bug table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BugType {
    /// Valid despite the bug; run the normal apply path.
    FullyApply,
    /// Leave the name database alone; the outputs stay in the UTXO set.
    FullyIgnore,
    /// Leave the name database alone and burn the name outputs so the
    /// UTXO set and the name index stay mutually consistent.
    IgnoreMarkUnspendable,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Overrides the per-network expiration schedule when set.  Used by
    /// test parameter sets; production networks leave it `None`.
    pub fixed_name_expiration: Option<u32>,
    /// Minimum amount a name-carrying output must lock.
    pub min_name_coin_amount: Amount,
    /// Default `-checknamedb` interval: -1 disables, 0 checks every block,
    /// a positive value checks every that many blocks.
    pub default_check_name_db: i32,
    /// Below this height, name outputs in transactions without the name
    /// version marker are tolerated (early-chain relics).
    pub lenient_version_until: u32,
    historic_bugs: BTreeMap<(u32, Hash256), BugType>,
}

impl ChainParams {
    /// Expiration depth at the given height.  `h - name_expiration_depth(h)`
    /// must never decrease in `h`; `check_expiration_monotonicity` enforces
    /// that at startup.
    pub fn name_expiration_depth(&self, height: u32) -> u32 {
        if let Some(depth) = self.fixed_name_expiration {
            return depth;
        }

        match self.network {
            Network::Mainnet | Network::Testnet => {
                if height < 24_000 {
                    12_000
                } else if height < 48_000 {
                    height - 12_000
                } else {
                    36_000
                }
            }
            Network::Regtest => 30,
        }
    }

    pub fn min_name_coin_amount(&self, _height: u32) -> Amount {
        self.min_name_coin_amount
    }

    pub fn is_historic_bug(&self, txid: &Hash256, height: u32) -> Option<BugType> {
        self.historic_bugs.get(&(height, *txid)).copied()
    }

    pub fn default_check_name_db(&self) -> i32 {
        self.default_check_name_db
    }

    pub fn lenient_version_check(&self, height: u32) -> bool {
        height < self.lenient_version_until
    }

    /// Verify that the absolute expiration boundary is non-decreasing over
    /// the schedule's breakpoints.  Parameter sets that violate this would
    /// make windowed expiration skip heights forever, so they are rejected
    /// before the chain state comes up.
    pub fn check_expiration_monotonicity(&self) -> Result<(), ParamsError> {
        let horizon = match self.fixed_name_expiration {
            Some(depth) => depth.saturating_mul(2).max(64),
            // Mainnet's last breakpoint is 48,000; one full depth past it
            // covers every regime transition.
            None => 48_000 + 36_000,
        };

        let mut last_boundary = 0i64;
        for height in 1..=horizon {
            let boundary = i64::from(height) - i64::from(self.name_expiration_depth(height));
            if boundary < last_boundary {
                return Err(ParamsError::NonMonotonicExpiration { height });
            }
            last_boundary = boundary;
        }
        Ok(())
    }

    /// Record a historic-bug exemption.  Production networks populate this
    /// from their constructors; test parameter sets add entries directly.
    pub fn insert_historic_bug(&mut self, height: u32, txid: Hash256, bug: BugType) {
        self.historic_bugs.insert((height, txid), bug);
    }

    fn add_bug(&mut self, height: u32, txid: &str, bug: BugType) {
        let hash = hash256_from_hex(txid).expect("historic bug txid");
        self.insert_historic_bug(height, hash, bug);
    }
}

#[derive(Debug)]
pub enum ParamsError {
    NonMonotonicExpiration { height: u32 },
}

impl std::fmt::Display for ParamsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamsError::NonMonotonicExpiration { height } => write!(
                f,
                "expiration boundary decreases at height {height}; refusing to start"
            ),
        }
    }
}

impl std::error::Error for ParamsError {}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

fn mainnet_chain_params() -> ChainParams {
    let mut params = ChainParams {
        network: Network::Mainnet,
        fixed_name_expiration: None,
        min_name_coin_amount: CENT,
        default_check_name_db: -1,
        lenient_version_until: 212_500,
        historic_bugs: BTreeMap::new(),
    };

    /* Transactions with name outputs but a non-name tx version.  Their
       registrations were never interpreted by the historic client, so the
       outputs are burnt to keep the UTXO set and name index consistent.  */
    params.add_bug(
        98423,
        "bff3ed6873e5698b97bf0c28c29302b59588590b747787c7d1ef32decdabe0d1",
        BugType::IgnoreMarkUnspendable,
    );
    params.add_bug(
        98424,
        "e9b211007e5cac471769212ca0f47bb066b81966a8e541d44acf0f8a1bd24976",
        BugType::IgnoreMarkUnspendable,
    );
    params.add_bug(
        98425,
        "8aa2b0fc7d1033de28e0192526765a72e9df0c635f7305bdc57cb451ed01a4ca",
        BugType::IgnoreMarkUnspendable,
    );

    /* Accepted due to the argument-concatenation bug; the update output is
       processed normally.  */
    params.add_bug(
        99381,
        "774d4c446cecfc40b1c02fdc5a13be6d2007233f9d91daefab6b3c2e70042f05",
        BugType::FullyApply,
    );

    /* The name-stealing demonstration.  The first transaction's outputs must
       remain spendable (they feed the second), but neither touches the name
       database.  */
    params.add_bug(
        139872,
        "2f034f2499c136a2c5a922ca4be65c1292815c753bbb100a2a26d5ad532c3919",
        BugType::FullyIgnore,
    );
    params.add_bug(
        139936,
        "c3e76d5384139228221cce60250397d1b87adf7366086bc8d6b5e6eee03c55c7",
        BugType::IgnoreMarkUnspendable,
    );

    params
}

fn testnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        fixed_name_expiration: None,
        min_name_coin_amount: CENT,
        default_check_name_db: -1,
        lenient_version_until: 0,
        historic_bugs: BTreeMap::new(),
    }
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        fixed_name_expiration: None,
        min_name_coin_amount: CENT,
        default_check_name_db: 0,
        lenient_version_until: 0,
        historic_bugs: BTreeMap::new(),
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

/// Parse a display-order (big-endian) hex hash into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        let byte =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
        *byte_out = byte;
    }
    bytes.reverse();

    Ok(bytes)
}

/// Format an internal-order hash for display (big-endian hex).
pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

fn hex_digit(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        _ => (b'a' + (value - 10)) as char,
    }
}
