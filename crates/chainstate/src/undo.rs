//! Per-block undo records.

use nmcd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use nmcd_primitives::outpoint::OutPoint;

use nmcd_names::{ExpiredCoin, NameTxUndo};

use crate::utxo::UtxoEntry;

const BLOCK_UNDO_VERSION: u8 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

/// Everything needed to disconnect one block: the coins its transactions
/// spent, the name operations it applied, and the name coins its
/// connection expired.
#[derive(Clone, Debug, Default)]
pub struct BlockUndo {
    pub spent: Vec<SpentOutput>,
    pub name_ops: Vec<NameTxUndo>,
    pub expired: Vec<ExpiredCoin>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.spent.len() as u32);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&spent.entry.encode());
        }
        encoder.write_u32_le(self.name_ops.len() as u32);
        for undo in &self.name_ops {
            undo.consensus_encode(&mut encoder);
        }
        encoder.write_u32_le(self.expired.len() as u32);
        for expired in &self.expired {
            expired.consensus_encode(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let spent_len = decoder.read_u32_le()? as usize;
        let mut spent = Vec::with_capacity(spent_len.min(4096));
        for _ in 0..spent_len {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let entry_bytes = decoder.read_var_bytes()?;
            let entry = UtxoEntry::decode(&entry_bytes)
                .map_err(|_| DecodeError::InvalidData("invalid utxo entry in undo"))?;
            spent.push(SpentOutput { outpoint, entry });
        }
        let name_len = decoder.read_u32_le()? as usize;
        let mut name_ops = Vec::with_capacity(name_len.min(4096));
        for _ in 0..name_len {
            name_ops.push(NameTxUndo::consensus_decode(&mut decoder)?);
        }
        let expired_len = decoder.read_u32_le()? as usize;
        let mut expired = Vec::with_capacity(expired_len.min(4096));
        for _ in 0..expired_len {
            expired.push(ExpiredCoin::consensus_decode(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            spent,
            name_ops,
            expired,
        })
    }
}
