use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowstore_core::storage::{
    BlockId, BlockSetter, BlockState, ChunkStore, CleanupOutcome, MemoryBlockTable, MemoryChunkStore, ResourceKey,
    StaticUser, StoreCall, UserResolver,
};
use flowstore_core::{
    Block, CleanupMode, CleanupResult, SavingStatus, StorageClass, StrategyConfig, SwitchAction, SwitchOrchestrator,
    UserId,
};

struct Harness {
    store: Arc<MemoryChunkStore>,
    table: Arc<MemoryBlockTable>,
    orchestrator: SwitchOrchestrator,
}

impl Harness {
    fn new(config: StrategyConfig) -> Self {
        let store = Arc::new(MemoryChunkStore::new(UserId::from("alice")));
        let table = Arc::new(MemoryBlockTable::new());
        let orchestrator = SwitchOrchestrator::new(
            store.clone(),
            table.clone(),
            Arc::new(StaticUser(UserId::from("alice"))),
            config,
        );
        Self { store, table, orchestrator }
    }

    fn blocking(threshold: usize, chunk_size: usize) -> Self {
        Self::new(
            StrategyConfig::default()
                .with_threshold(threshold)
                .with_chunk_size(chunk_size)
                .with_cleanup_mode(CleanupMode::Blocking),
        )
    }

    /// Edit the caller's copy, then hand the snapshot to the orchestrator
    async fn edit_and_save(&self, block_id: &BlockId, content: &str) -> Result<SwitchAction> {
        self.table.update(block_id, &mut |b| b.record_edit(content));
        let block = self.table.get(block_id).ok_or_else(|| anyhow!("missing block"))?;
        let outcome = self.orchestrator.handle_switch(&block, content).await?;
        Ok(outcome.action)
    }

    fn uploads(&self) -> Vec<String> {
        self.store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::UploadChunk { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn overwrite_counts(&self) -> Vec<usize> {
        self.store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::OverwriteManifest { chunk_count, .. } => Some(chunk_count),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn test_content_below_threshold_stays_internal() {
    let h = Harness::blocking(1024, 1024);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));

    let action = h.edit_and_save(&block_id, &"a".repeat(1023)).await.unwrap();

    assert_eq!(action, SwitchAction::Inlined);
    assert!(h.store.calls().is_empty());
    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::Internal);
    assert_eq!(block.saving_status, SavingStatus::Saved);
}

#[tokio::test]
async fn test_reaching_threshold_switches_to_external() {
    let h = Harness::blocking(1024, 1024);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, &"a".repeat(1023)).await.unwrap();

    let action = h.edit_and_save(&block_id, &"a".repeat(1024)).await.unwrap();

    assert_eq!(action, SwitchAction::SwitchedToExternal);
    assert_eq!(h.store.count_creates(), 1);
    assert_eq!(h.uploads(), vec!["chunk_000000.txt"]);
    assert_eq!(h.overwrite_counts(), vec![1]);

    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::External);
    assert_eq!(block.state(), BlockState::External { dirty: false });
    assert_eq!(block.saving_status, SavingStatus::Saved);

    let metadata = block.external_metadata.unwrap();
    assert!(metadata.resource_key.as_str().starts_with("alice/b1/"));
    let manifest = h.store.manifest(&block_id, &metadata.version_id).unwrap();
    assert_eq!(manifest.chunks.len(), 1);
    assert_eq!(manifest.chunks[0].name, "chunk_000000.txt");
    assert_eq!(manifest.chunks[0].size, 1024);
    assert_eq!(manifest.chunks[0].mime_type, "text/plain");
}

#[tokio::test]
async fn test_structured_records_are_never_split() {
    let h = Harness::blocking(4, 10);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::structured(block_id.clone(), ""));

    let content = r#"[{"a":1}, {"a":2}]"#;
    h.edit_and_save(&block_id, content).await.unwrap();

    assert_eq!(h.uploads(), vec!["chunk_000000.jsonl", "chunk_000001.jsonl"]);
    let block = h.table.get(&block_id).unwrap();
    let version_id = block.external_metadata.as_ref().unwrap().version_id.clone();
    assert_eq!(h.store.object(&block_id, &version_id, "chunk_000000.jsonl").unwrap(), b"{\"a\":1}\n");
    assert_eq!(h.store.object(&block_id, &version_id, "chunk_000001.jsonl").unwrap(), b"{\"a\":2}\n");

    let loaded = h.orchestrator.load_content(&block).await.unwrap();
    assert_eq!(loaded, r#"[{"a":1},{"a":2}]"#);
}

#[tokio::test]
async fn test_shrinking_content_deletes_dropped_chunk() {
    let h = Harness::blocking(5, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "aaaabbbbcccc").await.unwrap();
    assert_eq!(h.uploads().len(), 3);
    h.store.clear_calls();

    let action = h.edit_and_save(&block_id, "aaaabbbb").await.unwrap();

    assert_eq!(action, SwitchAction::Synced);
    assert_eq!(h.uploads(), vec!["chunk_000000.txt", "chunk_000001.txt"]);
    let mut deleted = h.store.deleted_names();
    deleted.sort();
    assert_eq!(deleted, vec!["chunk_000002.txt", "chunk_000002.txt.metadata"]);
    assert_eq!(h.overwrite_counts(), vec![2]);

    let block = h.table.get(&block_id).unwrap();
    assert!(!block.dirty);
    assert_eq!(h.orchestrator.load_content(&block).await.unwrap(), "aaaabbbb");
}

#[tokio::test]
async fn test_first_sync_skips_manifest_fetch() {
    let h = Harness::blocking(4, 1024);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));

    h.edit_and_save(&block_id, "abcdef").await.unwrap();

    assert!(!h.store.calls().iter().any(|c| matches!(c, StoreCall::GetManifest { .. })));
    assert!(h.store.deleted_names().is_empty());
}

#[tokio::test]
async fn test_missing_old_manifest_means_no_cleanup() {
    let h = Harness::blocking(4, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "aaaabbbb").await.unwrap();

    // Point the block at a version the store has never seen
    let mut block = h.table.get(&block_id).unwrap();
    let stale = ResourceKey::from_string("alice/b1/unknown");
    block.external_metadata.as_mut().unwrap().resource_key = stale.clone();
    block.record_edit("aaaa");
    h.table.insert(block.clone());
    h.store.clear_calls();

    let outcome = h.orchestrator.handle_switch(&block, "aaaa").await.unwrap();

    assert!(matches!(outcome.cleanup, CleanupResult::Skipped));
    assert!(h.store.calls().iter().any(|c| matches!(c, StoreCall::GetManifest { .. })));
    assert!(h.store.deleted_names().is_empty());
    assert_eq!(h.table.get(&block_id).unwrap().resource_key(), Some(&stale));
}

#[tokio::test]
async fn test_round_trip_through_internal_reuses_pointer() {
    let h = Harness::blocking(8, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));

    h.edit_and_save(&block_id, "0123456789").await.unwrap();
    let first_key = h.table.get(&block_id).unwrap().resource_key().cloned().unwrap();

    let action = h.edit_and_save(&block_id, "0123").await.unwrap();
    assert_eq!(action, SwitchAction::SwitchedToInternal);
    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::Internal);
    assert_eq!(block.content, "0123");
    assert_eq!(block.resource_key(), Some(&first_key));

    let action = h.edit_and_save(&block_id, "0123456789abcdef").await.unwrap();
    assert_eq!(action, SwitchAction::SwitchedToExternal);
    assert_eq!(h.store.count_creates(), 1);

    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.resource_key(), Some(&first_key));
    assert_eq!(h.orchestrator.load_content(&block).await.unwrap(), "0123456789abcdef");
}

#[tokio::test]
async fn test_internal_external_internal_preserves_content() {
    let h = Harness::blocking(8, 5);
    let original = "héllo wörld, ünïcode spans chunk edges";
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, original).await.unwrap();

    // Raise the threshold and bring the block back inline with what was stored
    h.orchestrator.set_threshold_override(1024);
    let block = h.table.get(&block_id).unwrap();
    let loaded = h.orchestrator.load_content(&block).await.unwrap();
    let outcome = h.orchestrator.handle_switch(&block, &loaded).await.unwrap();

    assert_eq!(outcome.action, SwitchAction::SwitchedToInternal);
    assert_eq!(h.table.get(&block_id).unwrap().content.as_bytes(), original.as_bytes());
}

#[tokio::test]
async fn test_switch_to_internal_makes_no_calls() {
    let h = Harness::blocking(8, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "0123456789").await.unwrap();
    h.store.clear_calls();

    h.edit_and_save(&block_id, "short").await.unwrap();
    assert!(h.store.calls().is_empty());
}

#[tokio::test]
async fn test_empty_content_writes_manifest_without_chunks() {
    let h = Harness::blocking(0, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "aaaabbbb").await.unwrap();
    h.store.clear_calls();

    let action = h.edit_and_save(&block_id, "").await.unwrap();

    assert_eq!(action, SwitchAction::Synced);
    assert!(h.uploads().is_empty());
    assert!(h.store.deleted_names().is_empty());
    assert_eq!(h.overwrite_counts(), vec![0]);

    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::External);
    assert_eq!(h.orchestrator.load_content(&block).await.unwrap(), "");
}

#[tokio::test]
async fn test_failed_switch_is_not_rolled_back() {
    let h = Harness::blocking(4, 4);
    h.store.fail_upload_at(Some(1));
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));

    let err = h.edit_and_save(&block_id, "aaaabbbbcccc").await.unwrap_err();
    assert!(err.to_string().contains("status 503"));

    // Pointer kept, class unchanged, manifest never overwritten
    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::Internal);
    assert_eq!(block.saving_status, SavingStatus::SwitchError);
    assert_eq!(block.state(), BlockState::SwitchError);
    assert!(block.save_error.as_deref().unwrap().contains("status 503"));
    assert!(block.external_metadata.is_some());
    assert!(h.overwrite_counts().is_empty());

    // A retry reuses the pointer and completes the switch
    h.store.fail_upload_at(None);
    let action = h.edit_and_save(&block_id, "aaaabbbbcccc").await.unwrap();
    assert_eq!(action, SwitchAction::SwitchedToExternal);
    assert_eq!(h.store.count_creates(), 1);

    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.saving_status, SavingStatus::Saved);
    assert!(block.save_error.is_none());
}

#[tokio::test]
async fn test_failed_resync_marks_error() {
    let h = Harness::blocking(4, 4);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "aaaabbbb").await.unwrap();

    h.store.fail_get_manifest(true);
    assert!(h.edit_and_save(&block_id, "aaaabbbbcccc").await.is_err());

    let block = h.table.get(&block_id).unwrap();
    assert_eq!(block.storage_class, StorageClass::External);
    assert_eq!(block.saving_status, SavingStatus::Error);
    assert!(block.dirty);
}

#[tokio::test]
async fn test_runtime_threshold_override() {
    let h = Harness::blocking(1024, 1024);
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));

    assert_eq!(h.edit_and_save(&block_id, "hello world").await.unwrap(), SwitchAction::Inlined);

    h.orchestrator.set_threshold_override(10);
    assert_eq!(
        h.edit_and_save(&block_id, "hello world").await.unwrap(),
        SwitchAction::SwitchedToExternal
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_cleanup_does_not_block_sync() {
    let h = Harness::new(
        StrategyConfig::default()
            .with_threshold(4)
            .with_chunk_size(4)
            .with_cleanup_mode(CleanupMode::Background { timeout: Duration::from_secs(10) }),
    );
    let block_id = BlockId::from("b1");
    h.table.insert(Block::text(block_id.clone(), ""));
    h.edit_and_save(&block_id, "aaaabbbbcccc").await.unwrap();
    h.store.delay_deletes(Some(Duration::from_secs(60)));

    let block = {
        h.table.update(&block_id, &mut |b| b.record_edit("aaaa"));
        h.table.get(&block_id).unwrap()
    };
    let outcome = h.orchestrator.handle_switch(&block, "aaaa").await.unwrap();

    // Manifest written before cleanup settles
    assert_eq!(h.overwrite_counts().last(), Some(&1));
    assert_eq!(outcome.block.saving_status, SavingStatus::Saved);
    assert_eq!(outcome.wait_for_cleanup().await, Some(CleanupOutcome::TimedOut));
}

struct NoUser;

#[async_trait]
impl UserResolver for NoUser {
    async fn user_id(&self) -> Result<UserId> {
        Err(anyhow!("not signed in"))
    }
}

#[tokio::test]
async fn test_cleanup_skipped_without_user() {
    let store = Arc::new(MemoryChunkStore::default());
    let table = Arc::new(MemoryBlockTable::new());
    let orchestrator = SwitchOrchestrator::new(
        store.clone(),
        table.clone(),
        Arc::new(NoUser),
        StrategyConfig::default()
            .with_threshold(4)
            .with_chunk_size(4)
            .with_cleanup_mode(CleanupMode::Blocking),
    );
    let block_id = BlockId::from("b1");
    table.insert(Block::text(block_id.clone(), ""));

    let block = table.get(&block_id).unwrap();
    orchestrator.handle_switch(&block, "aaaabbbb").await.unwrap();
    let block = table.get(&block_id).unwrap();
    let outcome = orchestrator.handle_switch(&Block { dirty: true, ..block }, "aaaa").await.unwrap();

    assert!(matches!(outcome.cleanup, CleanupResult::Skipped));
    assert!(store.deleted_names().is_empty());
}

#[tokio::test]
async fn test_closure_setter_receives_updates() {
    let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let setter = move |_: &BlockId, mutate: &mut dyn FnMut(&mut Block)| {
        let mut copy = Block::text("b1", "");
        mutate(&mut copy);
        sink.lock().unwrap().push(copy.saving_status);
    };
    let orchestrator = SwitchOrchestrator::new(
        store,
        Arc::new(setter),
        Arc::new(StaticUser(UserId::from("alice"))),
        StrategyConfig::default().with_threshold(4),
    );

    orchestrator.handle_switch(&Block::text("b1", ""), "abcdef").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&SavingStatus::SwitchingToExternal));
    assert_eq!(seen.last(), Some(&SavingStatus::Saved));
}
