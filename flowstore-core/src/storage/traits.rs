//! Ports between the engine and its collaborators
//!
//! - `ChunkStore` - the remote chunk/manifest store (HTTP in production)
//! - `BlockSetter` - the caller's block state; the engine never owns blocks
//! - `UserResolver` - resolves the acting user for cleanup attribution

use anyhow::Result;
use async_trait::async_trait;

use crate::storage::ids::{BlockId, UserId, VersionId};
use crate::storage::manifest::Manifest;
use crate::storage::types::{Block, ResourceKey};

/// Version minted by the store for a new manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatedVersion {
    pub version_id: VersionId,
    pub resource_key: ResourceKey,
}

/// Store acknowledgement of an uploaded chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedChunk {
    pub etag: String,
    /// Byte count as reported by the store
    pub size: u64,
}

/// Remote chunk store scoped by `(block_id, version_id)`
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Post an empty `generating` manifest so the store mints a new version
    async fn create_initial_manifest(&self, block_id: &BlockId) -> Result<AllocatedVersion>;

    /// Upload raw chunk bytes
    async fn upload_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<UploadedChunk>;

    /// Replace the manifest stored at this version wholesale
    async fn overwrite_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        manifest: &Manifest,
    ) -> Result<()>;

    /// Fetch the current manifest.
    ///
    /// Returns Ok(None) when the store has no manifest (404); any other
    /// failure is an error.
    async fn get_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        resource_key: Option<&ResourceKey>,
    ) -> Result<Option<Manifest>>;

    /// Delete one stored object (chunk or chunk sidecar)
    async fn delete_chunk(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Result<()>;

    /// Download raw chunk bytes
    async fn download_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
    ) -> Result<Vec<u8>>;
}

/// Caller-owned block state.
///
/// `update` applies `mutate` to the caller's copy of the block, if it still
/// exists. Implementations must not hold locks across await points; the
/// engine only calls this synchronously.
pub trait BlockSetter: Send + Sync {
    fn update(&self, block_id: &BlockId, mutate: &mut dyn FnMut(&mut Block));

    /// Current copy of the block, read through `update`
    fn snapshot(&self, block_id: &BlockId) -> Option<Block> {
        let mut current = None;
        self.update(block_id, &mut |b| current = Some(b.clone()));
        current
    }
}

impl<F> BlockSetter for F
where
    F: Fn(&BlockId, &mut dyn FnMut(&mut Block)) + Send + Sync,
{
    fn update(&self, block_id: &BlockId, mutate: &mut dyn FnMut(&mut Block)) {
        self(block_id, mutate)
    }
}

#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn user_id(&self) -> Result<UserId>;
}

/// Resolver for a user known up front
#[derive(Clone, Debug)]
pub struct StaticUser(pub UserId);

#[async_trait]
impl UserResolver for StaticUser {
    async fn user_id(&self) -> Result<UserId> {
        Ok(self.0.clone())
    }
}
