//! Storage class switch orchestration
//!
//! `SwitchOrchestrator::handle_switch` is the single entry point the editor
//! calls once an edit burst has settled. It compares the block's current
//! storage class with the class its new content calls for and then either
//! does nothing, writes the content inline, or runs a full external sync:
//!
//! 1. ensure the block's resource pointer (allocated at most once)
//! 2. empty content: write a manifest with no chunks and stop
//! 3. fetch the previous manifest (only if the block already had a pointer)
//! 4. encode the content into chunks
//! 5. upload chunks one at a time, in index order
//! 6. start orphan cleanup (background by default)
//! 7. overwrite the manifest with the complete chunk list
//! 8. mark the block external, clean and saved
//!
//! A failure before step 8 annotates the block (`switch_error` for a class
//! switch, `error` for a re-sync) and is returned to the caller. Nothing is
//! rolled back: a pointer allocated by a failed switch stays on the block.

use anyhow::{Result, anyhow};
use std::sync::{Arc, RwLock};

use crate::storage::codec::{self, EncodedChunk};
use crate::storage::decision::{content_length, decide};
use crate::storage::ids::{BlockId, VersionId};
use crate::storage::loader::ContentLoader;
use crate::storage::manifest::{Manifest, ManifestChunk};
use crate::storage::pointer::{ResourcePointer, ResourcePointerManager};
use crate::storage::reconcile::{CleanupHandle, CleanupOutcome, OrphanReconciler, ReconcileJob, ReconcileReport};
use crate::storage::traits::{BlockSetter, ChunkStore, UserResolver};
use crate::storage::types::{Block, ExternalMetadata, SavingStatus, StorageClass};
use crate::strategy::{CleanupMode, StrategyConfig};

/// What `handle_switch` did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchAction {
    /// External and clean: nothing to do
    Unchanged,
    /// Internal content written inline
    Inlined,
    /// Dirty external content re-synced
    Synced,
    SwitchedToExternal,
    SwitchedToInternal,
}

/// Orphan cleanup started by a sync
#[derive(Debug)]
pub enum CleanupResult {
    /// No previous manifest, or nothing was uploaded
    Skipped,
    Background(CleanupHandle),
    Finished(ReconcileReport),
}

#[derive(Debug)]
pub struct SwitchOutcome {
    pub action: SwitchAction,
    /// The block as the engine last wrote it
    pub block: Block,
    pub cleanup: CleanupResult,
}

impl SwitchOutcome {
    /// Wait for cleanup to settle. Returns None when no cleanup was started.
    pub async fn wait_for_cleanup(self) -> Option<CleanupOutcome> {
        match self.cleanup {
            CleanupResult::Skipped => None,
            CleanupResult::Finished(report) => Some(CleanupOutcome::Completed(report)),
            CleanupResult::Background(handle) => Some(handle.wait().await),
        }
    }
}

pub struct SwitchOrchestrator {
    store: Arc<dyn ChunkStore>,
    setter: Arc<dyn BlockSetter>,
    users: Arc<dyn UserResolver>,
    pointers: ResourcePointerManager,
    reconciler: OrphanReconciler,
    loader: ContentLoader,
    config: RwLock<StrategyConfig>,
}

impl SwitchOrchestrator {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        setter: Arc<dyn BlockSetter>,
        users: Arc<dyn UserResolver>,
        config: StrategyConfig,
    ) -> Self {
        Self {
            pointers: ResourcePointerManager::new(Arc::clone(&store), Arc::clone(&setter)),
            reconciler: OrphanReconciler::new(Arc::clone(&store)),
            loader: ContentLoader::new(Arc::clone(&store)),
            store,
            setter,
            users,
            config: RwLock::new(config),
        }
    }

    /// Snapshot of the effective configuration
    pub fn config(&self) -> StrategyConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_config(&self, config: StrategyConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Replace the threshold (e.g., with a server-announced value).
    /// Applies from the next `handle_switch`; synced content is untouched.
    pub fn set_threshold_override(&self, threshold: usize) {
        tracing::info!("Content length threshold overridden to {}", threshold);
        self.config.write().unwrap_or_else(|e| e.into_inner()).content_length_threshold = threshold;
    }

    pub fn set_chunk_size_override(&self, chunk_size: usize) {
        tracing::info!("Chunk size overridden to {}", chunk_size);
        self.config.write().unwrap_or_else(|e| e.into_inner()).chunk_size = chunk_size;
    }

    /// Storage class `content` would get under the current threshold
    pub fn target_class(&self, content: &str) -> StorageClass {
        decide(content_length(content), self.config().content_length_threshold)
    }

    /// Authoritative content of a block, downloading chunks if it is external
    pub async fn load_content(&self, block: &Block) -> Result<String> {
        self.loader.load(block).await
    }

    /// Persist `content` for `block`, switching storage class when the
    /// content crosses the threshold.
    ///
    /// Not safe to call concurrently for the same block: overlapping syncs
    /// are last-write-wins on the manifest. An edit recorded on the stored
    /// block while a sync is in flight survives it, left dirty.
    pub async fn handle_switch(&self, block: &Block, content: &str) -> Result<SwitchOutcome> {
        let config = self.config();
        let mut working = block.clone();
        let target = decide(content_length(content), config.content_length_threshold);

        let (action, cleanup) = match (working.storage_class, target) {
            (StorageClass::External, StorageClass::External) if !working.dirty => {
                (SwitchAction::Unchanged, CleanupResult::Skipped)
            }
            (StorageClass::External, StorageClass::External) => {
                self.apply(&mut working, |b| b.saving_status = SavingStatus::Saving);
                let cleanup = self.sync(&mut working, content, &config, SavingStatus::Error).await?;
                (SwitchAction::Synced, cleanup)
            }
            (StorageClass::Internal, StorageClass::Internal) => {
                let inline = content.to_string();
                self.apply(&mut working, |b| {
                    b.content = inline.clone();
                    b.saving_status = SavingStatus::Saved;
                    b.save_error = None;
                });
                (SwitchAction::Inlined, CleanupResult::Skipped)
            }
            (StorageClass::Internal, StorageClass::External) => {
                tracing::info!(
                    "Block {} reached {} chars, switching to external storage",
                    working.id,
                    content_length(content)
                );
                self.apply(&mut working, |b| b.saving_status = SavingStatus::SwitchingToExternal);
                let cleanup = self.sync(&mut working, content, &config, SavingStatus::SwitchError).await?;
                (SwitchAction::SwitchedToExternal, cleanup)
            }
            (StorageClass::External, StorageClass::Internal) => {
                tracing::info!("Block {} shrank below threshold, switching to internal storage", working.id);
                let inline = content.to_string();
                // external_metadata is kept so a later switch reuses the pointer
                self.apply(&mut working, |b| {
                    b.content = inline.clone();
                    b.storage_class = StorageClass::Internal;
                    b.dirty = false;
                    b.saving_status = SavingStatus::Saved;
                    b.save_error = None;
                });
                (SwitchAction::SwitchedToInternal, CleanupResult::Skipped)
            }
        };

        Ok(SwitchOutcome {
            action,
            block: working,
            cleanup,
        })
    }

    /// Run the sync procedure, annotating the block with `failure_status`
    /// and the error message if any step fails.
    async fn sync(
        &self,
        working: &mut Block,
        content: &str,
        config: &StrategyConfig,
        failure_status: SavingStatus,
    ) -> Result<CleanupResult> {
        match self.run_sync(working, content, config).await {
            Ok((pointer, cleanup)) => {
                let synced = content.to_string();
                let metadata = ExternalMetadata {
                    resource_key: pointer.resource_key,
                    version_id: pointer.version_id,
                    content_type: working.content_type,
                };
                let mark_synced = |b: &mut Block| {
                    b.content = synced.clone();
                    b.storage_class = StorageClass::External;
                    b.external_metadata = Some(metadata.clone());
                    b.dirty = false;
                    b.saving_status = SavingStatus::Saved;
                    b.save_error = None;
                };
                mark_synced(working);
                self.setter.update(&working.id, &mut |b| {
                    if b.saving_status == SavingStatus::Editing {
                        // Edited while this sync was in flight: keep the newer
                        // content and leave it dirty for the next save
                        b.storage_class = StorageClass::External;
                        b.external_metadata = Some(metadata.clone());
                        b.dirty = true;
                        b.save_error = None;
                    } else {
                        mark_synced(b);
                    }
                });
                Ok(cleanup)
            }
            Err(e) => {
                tracing::error!("Sync of block {} failed: {}", working.id, e);
                let message = e.to_string();
                self.apply(working, |b| {
                    b.saving_status = failure_status;
                    b.save_error = Some(message.clone());
                });
                Err(e)
            }
        }
    }

    async fn run_sync(
        &self,
        working: &mut Block,
        content: &str,
        config: &StrategyConfig,
    ) -> Result<(ResourcePointer, CleanupResult)> {
        let had_pointer = working.resource_key().and_then(|k| k.version_id()).is_some();
        let pointer = self.pointers.ensure_pointer(working).await?;
        let block_id = working.id.clone();

        if working.content_type.is_empty_content(content) {
            tracing::debug!("Block {} is empty, writing a manifest without chunks", block_id);
            let manifest = Manifest::completed(&block_id, &pointer.version_id, Vec::new());
            self.store
                .overwrite_manifest(&block_id, &pointer.version_id, &manifest)
                .await?;
            return Ok((pointer, CleanupResult::Skipped));
        }

        let old_manifest = if had_pointer {
            self.store
                .get_manifest(&block_id, &pointer.version_id, Some(&pointer.resource_key))
                .await?
        } else {
            None
        };

        let chunks = codec::encode(content, working.content_type, config.chunk_size);
        let entries = self
            .upload_chunks(&block_id, &pointer.version_id, &chunks, config)
            .await?;

        let cleanup = match old_manifest {
            Some(old_manifest) => {
                self.start_cleanup(&block_id, &pointer.version_id, old_manifest, &entries, config.cleanup_mode)
                    .await
            }
            None => CleanupResult::Skipped,
        };

        let manifest = Manifest::completed(&block_id, &pointer.version_id, entries);
        self.store
            .overwrite_manifest(&block_id, &pointer.version_id, &manifest)
            .await?;
        tracing::debug!(
            "Block {} synced as {} chunk(s) under {}",
            block_id,
            manifest.chunks.len(),
            pointer.resource_key
        );

        Ok((pointer, cleanup))
    }

    /// Upload chunks sequentially; the manifest only ever references chunks
    /// the store has already accepted.
    async fn upload_chunks(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        chunks: &[EncodedChunk],
        config: &StrategyConfig,
    ) -> Result<Vec<ManifestChunk>> {
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let uploaded = self
                .store
                .upload_chunk(block_id, version_id, &chunk.name, &chunk.mime_type, &chunk.bytes)
                .await?;
            tracing::debug!("Uploaded {} ({} bytes) for block {}", chunk.name, uploaded.size, block_id);

            let sent = chunk.bytes.len() as u64;
            if config.verify_upload_size && uploaded.size != sent {
                return Err(anyhow!(
                    "Store reported {} bytes for {} but {} were sent",
                    uploaded.size,
                    chunk.name,
                    sent
                ));
            }
            entries.push(ManifestChunk::uploaded(chunk, uploaded.etag, uploaded.size));
        }
        Ok(entries)
    }

    async fn start_cleanup(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        old_manifest: Manifest,
        new_chunks: &[ManifestChunk],
        mode: CleanupMode,
    ) -> CleanupResult {
        let user_id = match self.users.user_id().await {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!("Skipping orphan cleanup for block {}: no user ({})", block_id, e);
                return CleanupResult::Skipped;
            }
        };
        let job = ReconcileJob {
            block_id: block_id.clone(),
            version_id: version_id.clone(),
            old_manifest: Some(old_manifest),
            new_chunks: new_chunks.to_vec(),
            user_id,
        };

        match mode {
            CleanupMode::Blocking => CleanupResult::Finished(self.reconciler.reconcile(&job).await),
            CleanupMode::Background { timeout } => CleanupResult::Background(self.reconciler.spawn(job, timeout)),
        }
    }

    /// Apply `mutate` to the working copy and to the caller's block
    fn apply(&self, working: &mut Block, mutate: impl Fn(&mut Block)) {
        mutate(working);
        self.setter.update(&working.id, &mut |b| mutate(b));
    }
}
