//! Reading external content back
//!
//! Fetches a block's manifest and downloads its chunks in index order.
//! Internal blocks are served from their inline content.

use anyhow::{Result, anyhow};
use std::sync::Arc;

use crate::storage::codec::{self, EncodedChunk};
use crate::storage::manifest::Manifest;
use crate::storage::traits::ChunkStore;
use crate::storage::types::{Block, StorageClass};

pub struct ContentLoader {
    store: Arc<dyn ChunkStore>,
}

impl ContentLoader {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Authoritative content of `block`
    pub async fn load(&self, block: &Block) -> Result<String> {
        if block.storage_class == StorageClass::Internal {
            return Ok(block.content.clone());
        }

        let metadata = block
            .external_metadata
            .as_ref()
            .ok_or_else(|| anyhow!("External block {} has no resource pointer", block.id))?;
        let version_id = metadata
            .resource_key
            .version_id()
            .unwrap_or_else(|| metadata.version_id.clone());

        let manifest = self
            .store
            .get_manifest(&block.id, &version_id, Some(&metadata.resource_key))
            .await?
            .ok_or_else(|| anyhow!("No manifest found for block {} at {}", block.id, metadata.resource_key))?;

        self.load_manifest(&manifest).await
    }

    /// Download and decode every chunk a manifest lists
    pub async fn load_manifest(&self, manifest: &Manifest) -> Result<String> {
        let version_id = manifest
            .version_id
            .as_ref()
            .ok_or_else(|| anyhow!("Manifest for block {} has no version", manifest.block_id))?;

        let mut chunks = Vec::with_capacity(manifest.chunks.len());
        for entry in manifest.ordered_chunks() {
            let bytes = self
                .store
                .download_chunk(&manifest.block_id, version_id, &entry.name)
                .await?;
            chunks.push(EncodedChunk {
                name: entry.name.clone(),
                mime_type: entry.mime_type.clone(),
                bytes,
                index: entry.index,
            });
        }

        codec::decode(&chunks)
    }
}
