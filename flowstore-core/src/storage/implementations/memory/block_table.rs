//! In-memory BlockSetter implementation

use std::collections::HashMap;
use std::sync::Mutex;

use crate::storage::ids::BlockId;
use crate::storage::traits::BlockSetter;
use crate::storage::types::Block;

/// Caller-side block table, as an editor would keep it
#[derive(Debug, Default)]
pub struct MemoryBlockTable {
    blocks: Mutex<HashMap<BlockId, Block>>,
}

impl MemoryBlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.id.clone(), block);
    }

    pub fn get(&self, block_id: &BlockId) -> Option<Block> {
        self.blocks.lock().unwrap().get(block_id).cloned()
    }
}

impl BlockSetter for MemoryBlockTable {
    fn update(&self, block_id: &BlockId, mutate: &mut dyn FnMut(&mut Block)) {
        if let Some(block) = self.blocks.lock().unwrap().get_mut(block_id) {
            mutate(block);
        }
    }
}
