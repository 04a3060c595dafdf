//! Best-block pointer and the height index.

use std::sync::Arc;

use nmcd_consensus::Hash256;
use nmcd_primitives::encoding::{Decoder, Encoder};
use nmcd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const META_BEST_BLOCK_KEY: &[u8] = b"best_block";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: u32,
}

#[derive(Debug)]
pub struct ChainIndex<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> ChainIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn best_block(&self) -> Result<Option<ChainTip>, StoreError> {
        let bytes = match self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_tip(&bytes).map(Some).map_err(StoreError::Backend)
    }

    pub fn set_best_block(&self, batch: &mut WriteBatch, tip: &ChainTip) {
        let mut encoder = Encoder::new();
        encoder.write_hash_le(&tip.hash);
        encoder.write_u32_le(tip.height);
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, encoder.into_inner());
    }

    pub fn clear_best_block(&self, batch: &mut WriteBatch) {
        batch.delete(Column::Meta, META_BEST_BLOCK_KEY);
    }

    pub fn height_hash(&self, height: u32) -> Result<Option<Hash256>, StoreError> {
        let bytes = match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if bytes.len() != 32 {
            return Err(StoreError::Backend("invalid height index row".to_string()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Some(hash))
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: u32, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), *hash);
    }

    pub fn clear_height_hash(&self, batch: &mut WriteBatch, height: u32) {
        batch.delete(Column::HeightIndex, height_key(height));
    }
}

pub fn height_key(height: u32) -> [u8; 4] {
    height.to_le_bytes()
}

fn decode_tip(bytes: &[u8]) -> Result<ChainTip, String> {
    let mut decoder = Decoder::new(bytes);
    let hash = decoder
        .read_hash_le()
        .map_err(|err| err.to_string())?;
    let height = decoder.read_u32_le().map_err(|err| err.to_string())?;
    if !decoder.is_empty() {
        return Err("trailing bytes in best block row".to_string());
    }
    Ok(ChainTip { hash, height })
}
