//! In-memory implementations of the engine's ports

mod block_table;
mod chunk_store;

pub use block_table::MemoryBlockTable;
pub use chunk_store::{MemoryChunkStore, StoreCall};
