//! Consensus constants and chain parameters for the name chain.

pub mod constants;
pub mod money;
pub mod params;

pub type Hash256 = [u8; 32];

pub use params::{
    chain_params, hash256_from_hex, hash256_to_hex, BugType, ChainParams, HexError, Network,
    ParamsError,
};
