//! Manifest document
//!
//! One manifest exists per resource key. It is overwritten wholesale on every
//! external sync and is the single source of truth for which chunks make up
//! the current content version.

use serde::{Deserialize, Serialize};

use crate::storage::codec::EncodedChunk;
use crate::storage::ids::{BlockId, VersionId};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const MANIFEST_FORMAT_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Generating,
    Completed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    #[default]
    Done,
}

/// Manifest entry describing one uploaded chunk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Opaque integrity token returned by the store; round-tripped only
    pub etag: String,
    pub index: usize,
    #[serde(default)]
    pub state: ChunkState,
}

impl ManifestChunk {
    /// Entry for an encoded chunk the store has accepted
    pub fn uploaded(chunk: &EncodedChunk, etag: String, size: u64) -> Self {
        Self {
            name: chunk.name.clone(),
            mime_type: chunk.mime_type.clone(),
            size,
            etag,
            index: chunk.index,
            state: ChunkState::Done,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub block_id: BlockId,
    #[serde(default)]
    pub version_id: Option<VersionId>,
    pub updated_at: String,
    pub status: ManifestStatus,
    #[serde(default)]
    pub chunks: Vec<ManifestChunk>,
}

impl Manifest {
    /// Empty manifest posted to allocate a new version
    pub fn generating(block_id: &BlockId) -> Self {
        Self {
            version: MANIFEST_FORMAT_VERSION.to_string(),
            block_id: block_id.clone(),
            version_id: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
            status: ManifestStatus::Generating,
            chunks: Vec::new(),
        }
    }

    /// Final manifest listing every chunk of a synced version
    pub fn completed(block_id: &BlockId, version_id: &VersionId, chunks: Vec<ManifestChunk>) -> Self {
        Self {
            version: MANIFEST_FORMAT_VERSION.to_string(),
            block_id: block_id.clone(),
            version_id: Some(version_id.clone()),
            updated_at: chrono::Utc::now().to_rfc3339(),
            status: ManifestStatus::Completed,
            chunks,
        }
    }

    pub fn chunk_names(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.name.as_str())
    }

    /// Chunks sorted by index
    pub fn ordered_chunks(&self) -> Vec<&ManifestChunk> {
        let mut chunks: Vec<&ManifestChunk> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.index);
        chunks
    }
}
