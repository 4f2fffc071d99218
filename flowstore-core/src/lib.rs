//! Storage strategy engine for workflow canvas blocks
//!
//! Small block content lives inline in the block. Once content reaches the
//! configured length threshold it is split into chunks, uploaded to a remote
//! chunk store and described by a versioned manifest. The engine decides the
//! storage class, performs the switch in either direction, keeps one resource
//! key per block, and cleans up chunks a re-sync no longer references.

pub mod debounce;
pub mod helper;
pub mod orchestrator;
pub mod storage;
pub mod strategy;
pub mod traffic_log;

pub use debounce::{EditDebouncer, SaveEvent};
pub use orchestrator::{CleanupResult, SwitchAction, SwitchOrchestrator, SwitchOutcome};
pub use storage::{
    Block, BlockId, ContentType, HttpChunkStore, Manifest, MemoryBlockTable, MemoryChunkStore, SavingStatus,
    StorageClass, UserId, VersionId,
};
pub use strategy::{CleanupMode, StrategyConfig};
