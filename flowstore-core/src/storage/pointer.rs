//! Resource pointer management
//!
//! A block gets at most one resource key per lifetime. The first
//! externalization allocates it through the store; every later sync (and
//! every re-externalization after a switch back to internal) reuses it.

use anyhow::Result;
use std::sync::Arc;

use crate::storage::ids::VersionId;
use crate::storage::traits::{BlockSetter, ChunkStore};
use crate::storage::types::{Block, ExternalMetadata, ResourceKey};

/// Resolved external namespace of a block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePointer {
    pub resource_key: ResourceKey,
    pub version_id: VersionId,
}

pub struct ResourcePointerManager {
    store: Arc<dyn ChunkStore>,
    setter: Arc<dyn BlockSetter>,
}

impl ResourcePointerManager {
    pub fn new(store: Arc<dyn ChunkStore>, setter: Arc<dyn BlockSetter>) -> Self {
        Self { store, setter }
    }

    /// Return the block's existing pointer, or allocate one.
    ///
    /// A stored resource key whose version segment cannot be parsed counts as
    /// absent and is replaced. On allocation the new metadata is written to
    /// `block` and pushed through the setter before returning. Store errors
    /// propagate unchanged.
    pub async fn ensure_pointer(&self, block: &mut Block) -> Result<ResourcePointer> {
        if let Some(pointer) = Self::existing_pointer(block) {
            return Ok(pointer);
        }

        let allocated = self.store.create_initial_manifest(&block.id).await?;
        tracing::info!(
            "Allocated resource key {} for block {}",
            allocated.resource_key,
            block.id
        );

        let metadata = ExternalMetadata {
            resource_key: allocated.resource_key.clone(),
            version_id: allocated.version_id.clone(),
            content_type: block.content_type,
        };
        block.external_metadata = Some(metadata.clone());
        self.setter.update(&block.id, &mut |b| {
            b.external_metadata = Some(metadata.clone());
        });

        Ok(ResourcePointer {
            resource_key: allocated.resource_key,
            version_id: allocated.version_id,
        })
    }

    fn existing_pointer(block: &Block) -> Option<ResourcePointer> {
        let resource_key = block.resource_key()?;
        let version_id = resource_key.version_id()?;
        Some(ResourcePointer {
            resource_key: resource_key.clone(),
            version_id,
        })
    }
}
