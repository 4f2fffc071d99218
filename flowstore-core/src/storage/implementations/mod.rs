//! Port implementations
//!
//! - `http` - the production chunk store client
//! - `memory` - in-process chunk store and block table (tests, offline use)

pub mod http;
pub mod memory;

pub use http::HttpChunkStore;
pub use memory::{MemoryBlockTable, MemoryChunkStore, StoreCall};
