//! Optimistic create / update / delete against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use quire_blocks::{BlockPatch, BlockType, PagePatch, ValidationError};
use quire_editor::{BlockDraft, EditorConfig, EditorError, MemoryStore, Reconciler, StoreOp};

async fn setup() -> (Arc<MemoryStore>, Reconciler, String) {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone(), "client-a", EditorConfig::default());
    let page = reconciler.create_page("Notes", None).await.unwrap();
    (store, reconciler, page.id)
}

async fn text_blocks(reconciler: &Reconciler, page_id: &str, count: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for i in 0..count {
        let draft = BlockDraft::new(page_id, BlockType::Text).with_text(&format!("<p>{i}</p>"));
        ids.push(reconciler.create_block(draft).await.unwrap().id);
    }
    ids
}

#[tokio::test]
async fn test_failed_create_leaves_no_trace() {
    let (store, reconciler, page_id) = setup().await;
    store.fail_next(StoreOp::CreateBlock, 1);

    let err = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::Text))
        .await
        .unwrap_err();

    assert!(matches!(err, EditorError::Store(_)));
    assert!(reconciler.blocks(&page_id).is_empty());
    assert_eq!(reconciler.pending_count(), 0);
    assert!(store.blocks().is_empty());
}

#[tokio::test]
async fn test_created_block_appears_once() {
    let (store, reconciler, page_id) = setup().await;

    let block = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::Text).with_text("<p>hi</p>"))
        .await
        .unwrap();
    // Realtime echo of the same create
    reconciler.drain_events();

    let blocks = reconciler.blocks(&page_id);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].id, block.id);
    assert_eq!(store.blocks().len(), 1);
    assert!(!reconciler.is_pending(&block.id));
}

#[tokio::test]
async fn test_pending_create_visible_under_temp_id() {
    let (_, reconciler, page_id) = setup().await;

    let pending = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::Text))
        .unwrap();

    assert!(reconciler.config().is_temporary(&pending.temp_id));
    assert!(reconciler.is_pending(&pending.temp_id));
    assert_eq!(reconciler.blocks(&page_id)[0].id, pending.temp_id);

    // Refetching keeps the optimistic block on top
    reconciler.refresh(&page_id).await.unwrap();
    assert_eq!(reconciler.blocks(&page_id).len(), 1);

    let block = reconciler.finish_create_block(pending).await.unwrap();
    assert_eq!(reconciler.blocks(&page_id)[0].id, block.id);
}

#[tokio::test]
async fn test_update_on_unsaved_block_waits_for_create() {
    let (store, reconciler, page_id) = setup().await;
    let pending = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::Text))
        .unwrap();

    let shown = reconciler
        .update_block(&pending.temp_id, BlockPatch::text("<p>early</p>"))
        .await
        .unwrap();
    assert_eq!(shown.text_html(), "<p>early</p>");
    assert_eq!(store.calls(StoreOp::UpdateBlock), 0);

    let block = reconciler.finish_create_block(pending).await.unwrap();

    assert_eq!(store.calls(StoreOp::UpdateBlock), 1);
    assert_eq!(store.block(&block.id).unwrap().text_html(), "<p>early</p>");
    assert_eq!(reconciler.pending_count(), 0);
}

#[tokio::test]
async fn test_nothing_nests_under_unsaved_container() {
    let (_, reconciler, page_id) = setup().await;
    let toggle = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::ToggleList))
        .unwrap();

    let err = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::Text).under(&toggle.temp_id))
        .unwrap_err();

    assert_eq!(
        err,
        EditorError::Validation(ValidationError::ParentNotPersisted(toggle.temp_id.clone()))
    );
}

#[tokio::test]
async fn test_deleting_unsaved_block_cancels_create() {
    let (store, reconciler, page_id) = setup().await;
    let pending = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::Text))
        .unwrap();

    reconciler.delete_block(&pending.temp_id).await.unwrap();
    assert!(reconciler.blocks(&page_id).is_empty());

    let temp_id = pending.temp_id.clone();
    let err = reconciler.finish_create_block(pending).await.unwrap_err();

    assert_eq!(err, EditorError::Cancelled(temp_id));
    assert!(store.blocks().is_empty());
    assert_eq!(store.calls(StoreOp::DeleteBlock), 1);
    reconciler.drain_events();
    assert!(reconciler.blocks(&page_id).is_empty());
}

#[tokio::test]
async fn test_failed_simple_update_reverts_only_itself() {
    let (store, reconciler, page_id) = setup().await;
    let ids = text_blocks(&reconciler, &page_id, 2).await;
    store.fail_next(StoreOp::UpdateBlock, 1);

    let err = reconciler
        .update_block(&ids[0], BlockPatch::text("<p>lost</p>"))
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Store(_)));
    assert_eq!(reconciler.block(&ids[0]).unwrap().text_html(), "<p>0</p>");

    reconciler
        .update_block(&ids[1], BlockPatch::text("<p>kept</p>"))
        .await
        .unwrap();
    assert_eq!(reconciler.block(&ids[1]).unwrap().text_html(), "<p>kept</p>");
}

#[tokio::test]
async fn test_failed_move_reverts_everything_pending() {
    let (store, reconciler, page_id) = setup().await;
    let toggle = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::ToggleList))
        .await
        .unwrap();
    let ids = text_blocks(&reconciler, &page_id, 1).await;
    let unsent = reconciler
        .begin_create_block(BlockDraft::new(&page_id, BlockType::Text))
        .unwrap();
    store.fail_next(StoreOp::UpdateBlock, 1);

    let err = reconciler.move_block(&ids[0], &toggle.id, None).await.unwrap_err();

    assert!(matches!(err, EditorError::Store(_)));
    assert_eq!(reconciler.block(&ids[0]).unwrap().parent_id, page_id);
    assert!(reconciler.block(&unsent.temp_id).is_none());
    assert_eq!(reconciler.pending_count(), 0);
}

#[tokio::test]
async fn test_move_into_own_descendant_rejected_without_changes() {
    let (store, reconciler, page_id) = setup().await;
    let outer = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::ToggleList))
        .await
        .unwrap();
    let inner = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::ToggleList).under(&outer.id))
        .await
        .unwrap();
    let before = reconciler.blocks(&page_id);

    let err = reconciler.move_block(&outer.id, &inner.id, None).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(reconciler.blocks(&page_id), before);
    assert_eq!(store.calls(StoreOp::UpdateBlock), 0);
}

#[tokio::test]
async fn test_page_into_own_descendant_rejected() {
    let (store, reconciler, root) = setup().await;
    let child = reconciler.create_page("Child", Some(&root)).await.unwrap();
    let grandchild = reconciler.create_page("Grandchild", Some(&child.id)).await.unwrap();
    let before = reconciler.pages();

    let err = reconciler.move_page(&root, Some(&grandchild.id)).await.unwrap_err();

    assert!(matches!(
        err,
        EditorError::Validation(ValidationError::CycleDetected { .. })
    ));
    assert_eq!(reconciler.pages(), before);
    assert_eq!(store.calls(StoreOp::UpdatePage), 0);
}

#[tokio::test]
async fn test_page_cannot_move_under_unsaved_page() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
    let reconciler = Reconciler::new(store.clone(), "client-a", EditorConfig::default());
    let existing = reconciler.create_page("A", None).await.unwrap();

    let reparent = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let unsaved = reconciler
            .pages()
            .into_iter()
            .find(|page| page.title == "B")
            .map(|page| page.id)
            .unwrap();
        assert!(reconciler.config().is_temporary(&unsaved));
        reconciler
            .update_page(&existing.id, PagePatch::reparent(Some(unsaved)))
            .await
    };
    let (created, moved) = tokio::join!(reconciler.create_page("B", None), reparent);

    assert!(created.is_ok());
    assert!(matches!(
        moved,
        Err(EditorError::Validation(ValidationError::ParentNotPersisted(_)))
    ));
    assert_eq!(store.calls(StoreOp::UpdatePage), 0);
    let stored = store.pages().into_iter().find(|p| p.id == existing.id).unwrap();
    assert_eq!(stored.parent_id, None);
    assert_eq!(reconciler.pages().len(), 2);
}

#[tokio::test]
async fn test_failed_delete_restores_block() {
    let (store, reconciler, page_id) = setup().await;
    let ids = text_blocks(&reconciler, &page_id, 2).await;
    store.fail_next(StoreOp::DeleteBlock, 1);

    assert!(reconciler.delete_block(&ids[1]).await.is_err());
    assert_eq!(reconciler.blocks(&page_id).len(), 2);

    reconciler.delete_block(&ids[1]).await.unwrap();
    assert_eq!(reconciler.blocks(&page_id).len(), 1);
}

#[tokio::test]
async fn test_deleting_container_hides_children() {
    let (_, reconciler, page_id) = setup().await;
    let toggle = reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::ToggleList))
        .await
        .unwrap();
    reconciler
        .create_block(BlockDraft::new(&page_id, BlockType::Text).under(&toggle.id))
        .await
        .unwrap();

    reconciler.delete_block(&toggle.id).await.unwrap();

    assert!(reconciler.blocks(&page_id).is_empty());
}

#[tokio::test]
async fn test_reorder_sends_minimal_updates() {
    let (store, reconciler, page_id) = setup().await;
    let ids = text_blocks(&reconciler, &page_id, 5).await;

    let outcome = reconciler.reorder_blocks(&page_id, &page_id, 2, 0).await;

    assert!(outcome.is_complete());
    assert!(outcome.applied.len() <= 3);
    assert_eq!(store.calls(StoreOp::UpdateBlock), outcome.applied.len());

    let mut blocks = reconciler.blocks(&page_id);
    blocks.sort_by_key(|b| b.pos);
    let order: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    let expected: Vec<&str> = [2, 0, 1, 3, 4].iter().map(|&i| ids[i].as_str()).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_reorder_accepts_partial_success() {
    let (store, reconciler, page_id) = setup().await;
    let ids = text_blocks(&reconciler, &page_id, 5).await;
    store.fail_next(StoreOp::UpdateBlock, 1);

    let outcome = reconciler.reorder_blocks(&page_id, &page_id, 2, 0).await;

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.applied.len(), 2);
    // The failed sibling keeps its old position, the others keep theirs
    let (failed_id, _) = &outcome.failed[0];
    let original = ids.iter().position(|id| id == failed_id).unwrap() as i64;
    assert_eq!(reconciler.block(failed_id).unwrap().pos, original);
    for id in &outcome.applied {
        assert_eq!(reconciler.block(id).unwrap().pos, store.block(id).unwrap().pos);
    }
    assert_eq!(reconciler.pending_count(), 0);
}

#[tokio::test]
async fn test_property_input_validated_before_update() {
    let (store, reconciler, page_id) = setup().await;
    let schema = quire_blocks::PropertySchema::new("Done", quire_blocks::PropertyType::Checkbox);

    assert!(reconciler
        .set_page_property(&page_id, &schema, "maybe")
        .await
        .unwrap_err()
        .is_validation());
    assert_eq!(store.calls(StoreOp::UpdatePage), 0);

    reconciler.set_page_property(&page_id, &schema, "true").await.unwrap();
    assert_eq!(
        store.pages()[0].properties.get("Done"),
        Some(&quire_blocks::PropertyValue::Checkbox(true))
    );
}

#[tokio::test]
async fn test_changes_from_other_clients_arrive() {
    let (store, reconciler, page_id) = setup().await;
    let other = Reconciler::new(store.clone(), "client-b", EditorConfig::default());
    other.load_pages().await.unwrap();

    other
        .create_block(BlockDraft::new(&page_id, BlockType::Divider))
        .await
        .unwrap();
    other.update_page(&page_id, PagePatch::title("Renamed")).await.unwrap();

    assert!(reconciler.drain_events() >= 2);
    assert_eq!(reconciler.blocks(&page_id).len(), 1);
    assert_eq!(reconciler.page(&page_id).unwrap().title, "Renamed");
}
