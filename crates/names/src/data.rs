//! Name records and their persistence format.

use nmcd_consensus::constants::MEMPOOL_HEIGHT;
use nmcd_consensus::ChainParams;
use nmcd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use nmcd_primitives::outpoint::OutPoint;
use nmcd_script::names::NameScript;

/// A name key.  Opaque bytes, compared bytewise, no canonicalization.
pub type Name = Vec<u8>;

/// Check whether a name last updated at `prev_height` is expired at `height`.
/// Coins created by unconfirmed transactions carry the mempool sentinel
/// height and never count as expired.
pub fn is_expired(prev_height: u32, height: u32, params: &ChainParams) -> bool {
    if prev_height == MEMPOOL_HEIGHT {
        return false;
    }
    u64::from(prev_height) + u64::from(params.name_expiration_depth(height)) <= u64::from(height)
}

/// The database record for a live name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NameData {
    pub value: Vec<u8>,
    /// Height of the last update, the anchor for expiration.
    pub height: u32,
    /// Output that currently carries the name coin.
    pub prevout: OutPoint,
    /// Destination script of that output, kept so lookups can answer
    /// ownership without fetching the coin.
    pub address: Vec<u8>,
}

impl NameData {
    /// Build the record for an update operation mined at `height` in the
    /// output `prevout`.
    pub fn from_script(height: u32, prevout: OutPoint, script: &NameScript) -> Self {
        debug_assert!(script.op.is_any_update());
        Self {
            value: script.op.value().unwrap_or_default().to_vec(),
            height,
            prevout,
            address: script.address.clone(),
        }
    }

    pub fn is_expired_at(&self, height: u32, params: &ChainParams) -> bool {
        is_expired(self.height, height, params)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let data = Self::consensus_decode(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(data)
    }
}

impl Encodable for NameData {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.value);
        encoder.write_u32_le(self.height);
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.address);
    }
}

impl Decodable for NameData {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let prevout = OutPoint::consensus_decode(decoder)?;
        let address = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            height,
            prevout,
            address,
        })
    }
}

/// Append-only stack of a name's superseded records.  Empty means "no
/// recorded history"; the database row is erased instead of storing an
/// empty stack.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NameHistory {
    entries: Vec<NameData>,
}

impl NameHistory {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NameData] {
        &self.entries
    }

    /// Push a superseded record.  Heights on the stack never decrease.
    pub fn push(&mut self, entry: NameData) -> Result<(), &'static str> {
        if let Some(top) = self.entries.last() {
            if top.height > entry.height {
                return Err("history entry height below stack top");
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Pop the top record while undoing an update.  The caller passes the
    /// record that is being restored; it must match the stack top.
    pub fn pop(&mut self, expected: &NameData) -> Result<(), &'static str> {
        match self.entries.last() {
            Some(top) if top == expected => {
                self.entries.pop();
                Ok(())
            }
            Some(_) => Err("history stack top does not match undo record"),
            None => Err("history stack empty during undo"),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.entries.len() as u64);
        for entry in &self.entries {
            entry.consensus_encode(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let count = decoder.read_varint()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            entries.push(NameData::consensus_decode(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { entries })
    }
}
