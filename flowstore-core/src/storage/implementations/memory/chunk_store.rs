//! In-memory ChunkStore implementation
//!
//! Keeps objects and manifests in process memory and records every call so
//! tests can assert on the exact traffic the engine produced. Failures and
//! latency can be injected per operation.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::helper::content_hash;
use crate::storage::ids::{BlockId, UserId, VersionId};
use crate::storage::manifest::{MANIFEST_FILE_NAME, Manifest};
use crate::storage::traits::{AllocatedVersion, ChunkStore, UploadedChunk};
use crate::storage::types::ResourceKey;

/// One recorded call against the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    CreateManifest { block_id: BlockId },
    UploadChunk { block_id: BlockId, version_id: VersionId, name: String },
    OverwriteManifest { block_id: BlockId, version_id: VersionId, chunk_count: usize },
    GetManifest { block_id: BlockId, version_id: VersionId },
    DeleteChunk { block_id: BlockId, version_id: VersionId, name: String },
    DownloadChunk { block_id: BlockId, version_id: VersionId, name: String },
}

#[derive(Debug, Default)]
struct Faults {
    fail_create: bool,
    /// Zero-based upload call that fails
    fail_upload_at: Option<usize>,
    fail_overwrite: bool,
    fail_get_manifest: bool,
    fail_deletes: bool,
    upload_delay: Option<Duration>,
    delete_delay: Option<Duration>,
    size_skew: u64,
}

type ObjectKey = (BlockId, VersionId, String);

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectKey, Vec<u8>>,
    manifests: HashMap<(BlockId, VersionId), Manifest>,
    calls: Vec<StoreCall>,
    uploads: usize,
    faults: Faults,
}

/// In-memory chunk store for tests and offline use
#[derive(Debug)]
pub struct MemoryChunkStore {
    user_id: UserId,
    state: Mutex<State>,
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new(UserId::from("local-user"))
    }
}

impl MemoryChunkStore {
    /// Store that mints resource keys under `user_id`
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            state: Mutex::new(State::default()),
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Names of the objects deleted so far, in call order
    pub fn deleted_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::DeleteChunk { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn count_creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::CreateManifest { .. }))
            .count()
    }

    pub fn manifest(&self, block_id: &BlockId, version_id: &VersionId) -> Option<Manifest> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&(block_id.clone(), version_id.clone()))
            .cloned()
    }

    pub fn object(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(block_id.clone(), version_id.clone(), name.to_string()))
            .cloned()
    }

    /// Put an arbitrary object, e.g. a chunk's `.metadata` sidecar
    pub fn put_object(&self, block_id: &BlockId, version_id: &VersionId, name: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((block_id.clone(), version_id.clone(), name.to_string()), data.to_vec());
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().faults.fail_create = fail;
    }

    /// Fail the upload call with this zero-based index, counted since the store was created
    pub fn fail_upload_at(&self, call_index: Option<usize>) {
        self.state.lock().unwrap().faults.fail_upload_at = call_index;
    }

    pub fn fail_overwrite(&self, fail: bool) {
        self.state.lock().unwrap().faults.fail_overwrite = fail;
    }

    pub fn fail_get_manifest(&self, fail: bool) {
        self.state.lock().unwrap().faults.fail_get_manifest = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().faults.fail_deletes = fail;
    }

    /// Delay every upload by `delay`, keeping a sync in flight
    pub fn delay_uploads(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().faults.upload_delay = delay;
    }

    /// Delay every delete by `delay` (used to exercise cleanup timeouts)
    pub fn delay_deletes(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().faults.delete_delay = delay;
    }

    /// Report uploaded sizes inflated by `skew` bytes
    pub fn skew_reported_size(&self, skew: u64) {
        self.state.lock().unwrap().faults.size_skew = skew;
    }

    fn record(&self, call: StoreCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn create_initial_manifest(&self, block_id: &BlockId) -> Result<AllocatedVersion> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::CreateManifest { block_id: block_id.clone() });
        if state.faults.fail_create {
            return Err(anyhow!("Chunk store request failed with status 500: create failed"));
        }

        let version_id = VersionId::new();
        let storage_key = format!("{}/{}/{}/{}", self.user_id, block_id, version_id, MANIFEST_FILE_NAME);
        let resource_key = ResourceKey::from_storage_key(&storage_key)
            .ok_or_else(|| anyhow!("Invalid storage key: {}", storage_key))?;

        let mut manifest = Manifest::generating(block_id);
        manifest.version_id = Some(version_id.clone());
        state.manifests.insert((block_id.clone(), version_id.clone()), manifest);

        Ok(AllocatedVersion { version_id, resource_key })
    }

    async fn upload_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
        _mime_type: &str,
        bytes: &[u8],
    ) -> Result<UploadedChunk> {
        let (delay, upload_index) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(StoreCall::UploadChunk {
                block_id: block_id.clone(),
                version_id: version_id.clone(),
                name: name.to_string(),
            });
            let upload_index = state.uploads;
            state.uploads += 1;
            (state.faults.upload_delay, upload_index)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.faults.fail_upload_at == Some(upload_index) {
            return Err(anyhow!("Chunk store request failed with status 503: upload failed"));
        }

        state
            .objects
            .insert((block_id.clone(), version_id.clone(), name.to_string()), bytes.to_vec());

        Ok(UploadedChunk {
            etag: content_hash(bytes),
            size: bytes.len() as u64 + state.faults.size_skew,
        })
    }

    async fn overwrite_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        manifest: &Manifest,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::OverwriteManifest {
            block_id: block_id.clone(),
            version_id: version_id.clone(),
            chunk_count: manifest.chunks.len(),
        });
        if state.faults.fail_overwrite {
            return Err(anyhow!("Chunk store request failed with status 500: overwrite failed"));
        }
        state
            .manifests
            .insert((block_id.clone(), version_id.clone()), manifest.clone());
        Ok(())
    }

    async fn get_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        resource_key: Option<&ResourceKey>,
    ) -> Result<Option<Manifest>> {
        let version_id = resource_key
            .and_then(|k| k.version_id())
            .unwrap_or_else(|| version_id.clone());

        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::GetManifest {
            block_id: block_id.clone(),
            version_id: version_id.clone(),
        });
        if state.faults.fail_get_manifest {
            return Err(anyhow!("Chunk store request failed with status 502: bad gateway"));
        }
        Ok(state.manifests.get(&(block_id.clone(), version_id)).cloned())
    }

    async fn delete_chunk(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Result<()> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(StoreCall::DeleteChunk {
                block_id: block_id.clone(),
                version_id: version_id.clone(),
                name: name.to_string(),
            });
            (state.faults.delete_delay, state.faults.fail_deletes)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(anyhow!("Chunk store request failed with status 500: delete failed"));
        }

        let removed = self
            .state
            .lock()
            .unwrap()
            .objects
            .remove(&(block_id.clone(), version_id.clone(), name.to_string()));
        match removed {
            Some(_) => Ok(()),
            None => Err(anyhow!("Chunk store request failed with status 404: {} not found", name)),
        }
    }

    async fn download_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
    ) -> Result<Vec<u8>> {
        self.record(StoreCall::DownloadChunk {
            block_id: block_id.clone(),
            version_id: version_id.clone(),
            name: name.to_string(),
        });
        self.object(block_id, version_id, name)
            .ok_or_else(|| anyhow!("Chunk store request failed with status 404: {} not found", name))
    }
}
