//! Edit debouncing
//!
//! Editors fire an edit per keystroke; syncing on each would flood the store.
//! `EditDebouncer` records every edit on the block immediately and schedules
//! a single `handle_switch` once the block has been quiet for `window`.
//! A newer edit cancels the pending save, not a sync already in flight.

use anyhow::Result;
use config::StorageSettings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{SwitchAction, SwitchOrchestrator, SwitchOutcome};
use crate::storage::ids::BlockId;
use crate::storage::traits::BlockSetter;

/// Result of a debounced save, delivered on the event channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveEvent {
    Saved { block_id: BlockId, action: SwitchAction },
    Failed { block_id: BlockId, error: String },
}

struct PendingSave {
    token: CancellationToken,
    generation: u64,
}

pub struct EditDebouncer {
    orchestrator: Arc<SwitchOrchestrator>,
    setter: Arc<dyn BlockSetter>,
    window: Duration,
    pending: Arc<Mutex<HashMap<BlockId, PendingSave>>>,
    next_generation: Mutex<u64>,
    event_tx: mpsc::UnboundedSender<SaveEvent>,
}

impl EditDebouncer {
    pub fn new(
        orchestrator: Arc<SwitchOrchestrator>,
        setter: Arc<dyn BlockSetter>,
        window: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SaveEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            orchestrator,
            setter,
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
            event_tx,
        };
        (debouncer, event_rx)
    }

    /// Debouncer whose quiet window is `settings.debounce_ms`
    pub fn from_settings(
        orchestrator: Arc<SwitchOrchestrator>,
        setter: Arc<dyn BlockSetter>,
        settings: &StorageSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SaveEvent>) {
        Self::new(orchestrator, setter, Duration::from_millis(settings.debounce_ms))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an edit and (re)start the block's quiet timer
    pub fn edit(&self, block_id: &BlockId, content: impl Into<String>) {
        let content = content.into();
        self.setter.update(block_id, &mut |b| b.record_edit(content.clone()));

        let token = CancellationToken::new();
        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let previous = self.pending_map().insert(
            block_id.clone(),
            PendingSave {
                token: token.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let setter = Arc::clone(&self.setter);
        let pending = Arc::clone(&self.pending);
        let event_tx = self.event_tx.clone();
        let block_id = block_id.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::trace!("Pending save for block {} superseded", block_id);
                }
                _ = tokio::time::sleep(window) => {
                    {
                        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                        if pending.get(&block_id).is_some_and(|p| p.generation == generation) {
                            pending.remove(&block_id);
                        }
                    }
                    let event = save_now(&orchestrator, setter.as_ref(), &block_id).await;
                    if let Some(event) = event {
                        let _ = event_tx.send(event);
                    }
                }
            }
        });
    }

    /// Cancel the pending timer for `block_id` and save immediately.
    /// Returns None if the block no longer exists.
    pub async fn flush(&self, block_id: &BlockId) -> Result<Option<SwitchOutcome>> {
        if let Some(previous) = self.pending_map().remove(block_id) {
            previous.token.cancel();
        }
        let Some(block) = self.setter.snapshot(block_id) else {
            return Ok(None);
        };
        let content = block.content.clone();
        let outcome = self.orchestrator.handle_switch(&block, &content).await?;
        Ok(Some(outcome))
    }

    /// Drop the pending save for `block_id` without saving
    pub fn cancel(&self, block_id: &BlockId) -> bool {
        match self.pending_map().remove(block_id) {
            Some(previous) => {
                previous.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of blocks with a save scheduled
    pub fn pending_count(&self) -> usize {
        self.pending_map().len()
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<BlockId, PendingSave>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EditDebouncer {
    fn drop(&mut self) {
        for (_, pending) in self.pending_map().drain() {
            pending.token.cancel();
        }
    }
}

async fn save_now(orchestrator: &SwitchOrchestrator, setter: &dyn BlockSetter, block_id: &BlockId) -> Option<SaveEvent> {
    let block = setter.snapshot(block_id)?;
    let content = block.content.clone();
    match orchestrator.handle_switch(&block, &content).await {
        Ok(outcome) => Some(SaveEvent::Saved {
            block_id: block_id.clone(),
            action: outcome.action,
        }),
        Err(e) => Some(SaveEvent::Failed {
            block_id: block_id.clone(),
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::UserId;
    use crate::storage::implementations::{MemoryBlockTable, MemoryChunkStore, StoreCall};
    use crate::storage::loader::ContentLoader;
    use crate::storage::traits::StaticUser;
    use crate::storage::types::{Block, SavingStatus, StorageClass};
    use crate::strategy::{CleanupMode, StrategyConfig};

    fn setup(threshold: usize) -> (Arc<MemoryChunkStore>, Arc<MemoryBlockTable>, EditDebouncer, mpsc::UnboundedReceiver<SaveEvent>) {
        let store = Arc::new(MemoryChunkStore::default());
        let table = Arc::new(MemoryBlockTable::new());
        let config = StrategyConfig::default()
            .with_threshold(threshold)
            .with_chunk_size(4)
            .with_cleanup_mode(CleanupMode::Blocking);
        let orchestrator = Arc::new(SwitchOrchestrator::new(
            store.clone(),
            table.clone(),
            Arc::new(StaticUser(UserId::from("local-user"))),
            config,
        ));
        let (debouncer, events) = EditDebouncer::new(orchestrator, table.clone(), Duration::from_millis(2000));
        (store, table, debouncer, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_saves_once() {
        let (store, table, debouncer, mut events) = setup(8);
        let block = Block::text("b1", "");
        table.insert(block.clone());

        for content in ["a", "ab", "abc", "abcdefghij"] {
            debouncer.edit(&block.id, content);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(table.get(&block.id).unwrap().saving_status, SavingStatus::Editing);
        assert_eq!(debouncer.pending_count(), 1);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SaveEvent::Saved {
                block_id: block.id.clone(),
                action: SwitchAction::SwitchedToExternal
            }
        );
        assert_eq!(store.count_creates(), 1);
        let overwrites = store
            .calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::OverwriteManifest { .. }))
            .count();
        assert_eq!(overwrites, 1);

        let stored = table.get(&block.id).unwrap();
        assert_eq!(stored.storage_class, StorageClass::External);
        assert_eq!(stored.content, "abcdefghij");
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_sync_is_saved_next() {
        let (store, table, debouncer, mut events) = setup(8);
        store.delay_uploads(Some(Duration::from_millis(1000)));
        let block = Block::text("b1", "");
        table.insert(block.clone());

        // Timer fires at 2s; three 4-byte uploads then run until 5s
        debouncer.edit(&block.id, "abcdefghij");
        tokio::time::sleep(Duration::from_millis(4200)).await;
        let calls = store.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, StoreCall::UploadChunk { .. })).count(), 3);
        assert!(!calls.iter().any(|c| matches!(c, StoreCall::OverwriteManifest { .. })));

        debouncer.edit(&block.id, "ABCDEFGHIJKLMNOP");

        assert_eq!(
            events.recv().await.unwrap(),
            SaveEvent::Saved {
                block_id: block.id.clone(),
                action: SwitchAction::SwitchedToExternal
            }
        );
        let between = table.get(&block.id).unwrap();
        assert_eq!(between.content, "ABCDEFGHIJKLMNOP");
        assert!(between.dirty);

        assert_eq!(
            events.recv().await.unwrap(),
            SaveEvent::Saved {
                block_id: block.id.clone(),
                action: SwitchAction::Synced
            }
        );
        assert_eq!(store.count_creates(), 1);

        let stored = table.get(&block.id).unwrap();
        assert_eq!(stored.saving_status, SavingStatus::Saved);
        assert!(!stored.dirty);
        let loaded = ContentLoader::new(store.clone()).load(&stored).await.unwrap();
        assert_eq!(loaded, "ABCDEFGHIJKLMNOP");
    }

    #[tokio::test]
    async fn test_window_from_settings() {
        let (_store, table, debouncer, _events) = setup(1024);
        let settings = StorageSettings {
            debounce_ms: 250,
            ..Default::default()
        };
        let (configured, _rx) = EditDebouncer::from_settings(Arc::clone(&debouncer.orchestrator), table, &settings);
        assert_eq!(configured.window(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let (store, table, debouncer, _events) = setup(1024);
        let block = Block::text("b1", "");
        table.insert(block.clone());

        debouncer.edit(&block.id, "hello");
        let outcome = debouncer.flush(&block.id).await.unwrap().unwrap();

        assert_eq!(outcome.action, SwitchAction::Inlined);
        assert_eq!(debouncer.pending_count(), 0);
        assert!(store.calls().is_empty());
        assert_eq!(table.get(&block.id).unwrap().saving_status, SavingStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_save_never_runs() {
        let (_store, table, debouncer, mut events) = setup(1024);
        let block = Block::text("b1", "");
        table.insert(block.clone());

        debouncer.edit(&block.id, "draft");
        assert!(debouncer.cancel(&block.id));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(events.try_recv().is_err());
        assert_eq!(table.get(&block.id).unwrap().saving_status, SavingStatus::Editing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_as_event() {
        let (store, table, debouncer, mut events) = setup(4);
        store.fail_create(true);
        let block = Block::text("b1", "");
        table.insert(block.clone());

        debouncer.edit(&block.id, "abcdef");
        match events.recv().await.unwrap() {
            SaveEvent::Failed { block_id, error } => {
                assert_eq!(block_id, block.id);
                assert!(error.contains("status 500"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(table.get(&block.id).unwrap().saving_status, SavingStatus::SwitchError);
    }
}
