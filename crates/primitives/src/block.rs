//! Block and header types, including the merged-mining payload.

use nmcd_consensus::constants::VERSION_AUXPOW;
use nmcd_consensus::Hash256;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::Transaction;

/// Merged-mining proof.  The parent chain's coinbase commits to this chain's
/// block hash; the two merkle branches tie that commitment to the parent
/// header stored alongside.  Verification is the job of the proof-of-work
/// layer; here the payload only has to serialize byte-exactly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuxPow {
    pub coinbase_tx: Transaction,
    pub parent_hash: Hash256,
    pub coinbase_branch: Vec<Hash256>,
    pub coinbase_index: u32,
    pub chain_branch: Vec<Hash256>,
    pub chain_index: u32,
    pub parent_header: BlockHeader,
}

impl Encodable for AuxPow {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.coinbase_tx.consensus_encode(encoder);
        encoder.write_hash_le(&self.parent_hash);
        encoder.write_varint(self.coinbase_branch.len() as u64);
        for hash in &self.coinbase_branch {
            encoder.write_hash_le(hash);
        }
        encoder.write_u32_le(self.coinbase_index);
        encoder.write_varint(self.chain_branch.len() as u64);
        for hash in &self.chain_branch {
            encoder.write_hash_le(hash);
        }
        encoder.write_u32_le(self.chain_index);
        self.parent_header.encode_base(encoder);
    }
}

impl Decodable for AuxPow {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let coinbase_tx = Transaction::consensus_decode(decoder)?;
        let parent_hash = decoder.read_hash_le()?;
        let coinbase_len = decoder.read_varint()? as usize;
        let mut coinbase_branch = Vec::with_capacity(coinbase_len.min(64));
        for _ in 0..coinbase_len {
            coinbase_branch.push(decoder.read_hash_le()?);
        }
        let coinbase_index = decoder.read_u32_le()?;
        let chain_len = decoder.read_varint()? as usize;
        let mut chain_branch = Vec::with_capacity(chain_len.min(64));
        for _ in 0..chain_len {
            chain_branch.push(decoder.read_hash_le()?);
        }
        let chain_index = decoder.read_u32_le()?;
        let parent_header = BlockHeader::decode_base(decoder)?;
        Ok(Self {
            coinbase_tx,
            parent_hash,
            coinbase_branch,
            coinbase_index,
            chain_branch,
            chain_index,
            parent_header,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Present iff `version & VERSION_AUXPOW` is set.  The serializer and
    /// deserializer both consult the flag; a mismatch between flag and field
    /// is a decode error, never a panic.
    pub auxpow: Option<Box<AuxPow>>,
}

impl BlockHeader {
    pub fn has_auxpow_flag(&self) -> bool {
        self.version & VERSION_AUXPOW != 0
    }

    /// Hash of the 80-byte base header; the auxpow payload never
    /// contributes to the block hash.
    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.encode_base(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    fn encode_base(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }

    fn decode_base(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
            auxpow: None,
        })
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_base(encoder);
        if self.has_auxpow_flag() {
            if let Some(auxpow) = &self.auxpow {
                auxpow.consensus_encode(encoder);
            }
        }
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut header = Self::decode_base(decoder)?;
        if header.has_auxpow_flag() {
            header.auxpow = Some(Box::new(AuxPow::consensus_decode(decoder)?));
        }
        Ok(header)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.consensus_encode(encoder);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let count = decoder.read_varint()? as usize;
        let mut transactions = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            transactions.push(Transaction::consensus_decode(decoder)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

/// Merkle root over transaction ids, duplicating the last entry on odd
/// layers (the legacy scheme).
pub fn compute_merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            let last = *layer.last().expect("non-empty");
            layer.push(last);
        }
        let mut next = Vec::with_capacity((layer.len() + 1) / 2);
        for pair in layer.chunks(2) {
            let mut buf = [0u8; 64];
            buf[0..32].copy_from_slice(&pair[0]);
            buf[32..64].copy_from_slice(&pair[1]);
            next.push(sha256d(&buf));
        }
        layer = next;
    }
    layer[0]
}
