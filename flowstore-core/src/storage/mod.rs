//! Block content storage
//!
//! Leaf components of the storage strategy engine:
//!
//! - `decision` - threshold → storage class
//! - `codec` - deterministic chunking of text and JSON records
//! - `manifest` - the versioned chunk list document
//! - `pointer` - one resource key per block lifetime
//! - `reconcile` - deletion of chunks dropped by a re-sync
//! - `loader` - reassembling external content
//!
//! `traits` defines the ports (`ChunkStore`, `BlockSetter`, `UserResolver`);
//! `implementations` holds the HTTP client and in-memory doubles.

pub mod codec;
pub mod decision;
pub mod ids;
pub mod implementations;
pub mod loader;
pub mod manifest;
pub mod pointer;
pub mod reconcile;
pub mod traits;
pub mod types;

pub use codec::{EncodedChunk, decode, encode};
pub use decision::{content_length, decide};
pub use ids::{BlockId, UserId, VersionId};
pub use implementations::{HttpChunkStore, MemoryBlockTable, MemoryChunkStore, StoreCall};
pub use loader::ContentLoader;
pub use manifest::{Manifest, ManifestChunk, ManifestStatus};
pub use pointer::{ResourcePointer, ResourcePointerManager};
pub use reconcile::{CleanupHandle, CleanupOutcome, OrphanReconciler, ReconcileJob, ReconcileReport};
pub use traits::{AllocatedVersion, BlockSetter, ChunkStore, StaticUser, UploadedChunk, UserResolver};
pub use types::{Block, BlockState, ContentType, ExternalMetadata, ResourceKey, SavingStatus, StorageClass};
