//! Script classification and name-operation parsing.

pub mod names;
pub mod standard;
