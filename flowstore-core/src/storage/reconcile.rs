//! Orphan chunk reconciliation
//!
//! After a re-sync, chunks listed by the previous manifest but not by the new
//! chunk set are garbage. Deleting them is advisory cleanup: failures are
//! logged and swallowed, and the new manifest never depends on it.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::ids::{BlockId, UserId, VersionId};
use crate::storage::manifest::{Manifest, ManifestChunk};
use crate::storage::traits::ChunkStore;

/// Suffix of the sidecar object the store may keep next to each chunk
pub const METADATA_SUFFIX: &str = ".metadata";

/// What a reconciliation pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Chunk names present in the old manifest but not in the new chunk set
    pub orphans: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Owned inputs for one reconciliation pass
#[derive(Clone, Debug)]
pub struct ReconcileJob {
    pub block_id: BlockId,
    pub version_id: VersionId,
    pub old_manifest: Option<Manifest>,
    pub new_chunks: Vec<ManifestChunk>,
    pub user_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    Completed(ReconcileReport),
    /// The timeout elapsed first; remaining deletes were dropped
    TimedOut,
    Cancelled,
}

/// Handle to a background cleanup task
#[derive(Debug)]
pub struct CleanupHandle {
    token: CancellationToken,
    join: JoinHandle<CleanupOutcome>,
}

impl CleanupHandle {
    /// Abandon the cleanup; deletes not yet issued are never sent
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn wait(self) -> CleanupOutcome {
        self.join.await.unwrap_or(CleanupOutcome::Cancelled)
    }
}

#[derive(Clone)]
pub struct OrphanReconciler {
    store: Arc<dyn ChunkStore>,
}

impl OrphanReconciler {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Names in `old` that are absent from `new_chunks`, in old-manifest order
    pub fn orphaned_names(old: &Manifest, new_chunks: &[ManifestChunk]) -> Vec<String> {
        let new_names: HashSet<&str> = new_chunks.iter().map(|c| c.name.as_str()).collect();
        old.chunk_names()
            .filter(|name| !new_names.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Delete orphaned chunks and, best effort, their metadata sidecars.
    /// All deletes run concurrently. Never fails.
    pub async fn reconcile(&self, job: &ReconcileJob) -> ReconcileReport {
        let Some(old_manifest) = job.old_manifest.as_ref() else {
            return ReconcileReport::default();
        };

        let orphans = Self::orphaned_names(old_manifest, &job.new_chunks);
        if orphans.is_empty() {
            return ReconcileReport::default();
        }

        tracing::debug!(
            "Reconciling {} orphaned chunk(s) of block {} for user {}",
            orphans.len(),
            job.block_id,
            job.user_id
        );

        let deletes = orphans.iter().map(|name| self.delete_with_sidecar(job, name));
        let results = join_all(deletes).await;

        let mut report = ReconcileReport {
            orphans: orphans.clone(),
            ..Default::default()
        };
        for (name, ok) in orphans.into_iter().zip(results) {
            if ok {
                report.deleted.push(name);
            } else {
                report.failed.push(name);
            }
        }
        report
    }

    async fn delete_with_sidecar(&self, job: &ReconcileJob, name: &str) -> bool {
        let sidecar = format!("{}{}", name, METADATA_SUFFIX);
        let (chunk_result, sidecar_result) = futures::join!(
            self.store.delete_chunk(&job.block_id, &job.version_id, name),
            self.store.delete_chunk(&job.block_id, &job.version_id, &sidecar),
        );

        if let Err(e) = sidecar_result {
            // Sidecars are optional; a missing one is expected
            tracing::debug!("No metadata deleted for {}: {}", name, e);
        }
        match chunk_result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Failed to delete orphaned chunk {} of block {} (user {}): {}",
                    name,
                    job.block_id,
                    job.user_id,
                    e
                );
                false
            }
        }
    }

    /// Run `reconcile` in a background task that gives up after `timeout`.
    /// Losing the race drops the in-flight deletes; the orphans stay behind
    /// as unreferenced garbage.
    pub fn spawn(&self, job: ReconcileJob, timeout: Duration) -> CleanupHandle {
        let token = CancellationToken::new();
        let cancel_token = token.clone();
        let reconciler = self.clone();

        let join = tokio::spawn(async move {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::debug!("Cleanup for block {} cancelled", job.block_id);
                    CleanupOutcome::Cancelled
                }
                result = tokio::time::timeout(timeout, reconciler.reconcile(&job)) => match result {
                    Ok(report) => CleanupOutcome::Completed(report),
                    Err(_) => {
                        tracing::warn!(
                            "Cleanup for block {} timed out after {:?}; orphaned chunks left in place",
                            job.block_id,
                            timeout
                        );
                        cancel_token.cancel();
                        CleanupOutcome::TimedOut
                    }
                },
            }
        });

        CleanupHandle { token, join }
    }
}
