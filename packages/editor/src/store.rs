//! # Remote store
//!
//! The backend is an opaque CRUD service with realtime change events.
//! `MemoryStore` is the in-process implementation used by tests and the
//! CLI: it assigns server ids, emits events, counts calls and can be told to
//! fail upcoming calls.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use quire_blocks::{Block, BlockPatch, Entity, Page, PagePatch};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by store: {0}")]
    Rejected(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Store operations, used for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListPages,
    CreatePage,
    UpdatePage,
    DeletePage,
    ListBlocks,
    CreateBlock,
    UpdateBlock,
    DeleteBlock,
}

/// Realtime change notification
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    PageUpserted(Page),
    PageDeleted { id: String },
    BlockUpserted(Block),
    BlockDeleted { id: String, page_id: String },
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_pages(&self) -> Result<Vec<Page>, StoreError>;

    /// Persist a new page; the draft's id is ignored and the stored page
    /// carries the server id
    async fn create_page(&self, draft: Page) -> Result<Page, StoreError>;

    async fn update_page(&self, id: &str, patch: PagePatch) -> Result<Page, StoreError>;

    async fn delete_page(&self, id: &str) -> Result<(), StoreError>;

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StoreError>;

    async fn create_block(&self, draft: Block) -> Result<Block, StoreError>;

    async fn update_block(&self, id: &str, patch: BlockPatch) -> Result<Block, StoreError>;

    async fn delete_block(&self, id: &str) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Entities the reconciler knows how to persist
#[async_trait]
pub trait Persisted: Entity {
    fn pos_patch(pos: i64) -> Self::Patch;

    async fn create(store: &dyn RemoteStore, draft: Self) -> Result<Self, StoreError>;

    async fn update(store: &dyn RemoteStore, id: &str, patch: Self::Patch) -> Result<Self, StoreError>;

    async fn delete(store: &dyn RemoteStore, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl Persisted for Page {
    fn pos_patch(pos: i64) -> PagePatch {
        PagePatch {
            pos: Some(pos),
            ..Default::default()
        }
    }

    async fn create(store: &dyn RemoteStore, draft: Page) -> Result<Page, StoreError> {
        store.create_page(draft).await
    }

    async fn update(store: &dyn RemoteStore, id: &str, patch: PagePatch) -> Result<Page, StoreError> {
        store.update_page(id, patch).await
    }

    async fn delete(store: &dyn RemoteStore, id: &str) -> Result<(), StoreError> {
        store.delete_page(id).await
    }
}

#[async_trait]
impl Persisted for Block {
    fn pos_patch(pos: i64) -> BlockPatch {
        BlockPatch::pos(pos)
    }

    async fn create(store: &dyn RemoteStore, draft: Block) -> Result<Block, StoreError> {
        store.create_block(draft).await
    }

    async fn update(store: &dyn RemoteStore, id: &str, patch: BlockPatch) -> Result<Block, StoreError> {
        store.update_block(id, patch).await
    }

    async fn delete(store: &dyn RemoteStore, id: &str) -> Result<(), StoreError> {
        store.delete_block(id).await
    }
}

/// Serializable store contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Default)]
struct MemoryState {
    pages: Vec<Page>,
    blocks: Vec<Block>,
    /// Counter for server id generation
    next_id: u64,
    calls: HashMap<StoreOp, usize>,
    /// Remaining injected failures per operation
    failures: HashMap<StoreOp, usize>,
}

/// Numeric tail of a server id such as `block-12`
fn id_counter(id: &str) -> Option<u64> {
    id.rsplit('-').next()?.parse().ok()
}

impl MemoryState {
    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// In-memory `RemoteStore`
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<StoreEvent>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let (events, _) = broadcast::channel(256);
        // Continue after the highest id in use, deletes leave gaps
        let next_id = snapshot
            .pages
            .iter()
            .map(|p| p.id.as_str())
            .chain(snapshot.blocks.iter().map(|b| b.id.as_str()))
            .filter_map(id_counter)
            .max()
            .unwrap_or(0);
        Self {
            state: Mutex::new(MemoryState {
                next_id,
                pages: snapshot.pages,
                blocks: snapshot.blocks,
                ..Default::default()
            }),
            events,
            latency: None,
        }
    }

    /// Delay every call, so concurrent requests actually overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("{}: {}", path.display(), e)))?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| StoreError::Snapshot(format!("{}: {}", path.display(), e)))
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            pages: state.pages.clone(),
            blocks: state.blocks.clone(),
        }
    }

    /// Make the next `count` calls of `op` fail with `Unavailable`
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        *self.lock().failures.entry(op).or_default() += count;
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn pages(&self) -> Vec<Page> {
        self.lock().pages.clone()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.lock().blocks.clone()
    }

    pub fn block(&self, id: &str) -> Option<Block> {
        self.lock().blocks.iter().find(|b| b.id == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(?op, "injected store failure");
                return Err(StoreError::Unavailable(format!("injected failure for {:?}", op)));
            }
        }
        Ok(())
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_pages(&self) -> Result<Vec<Page>, StoreError> {
        self.enter(StoreOp::ListPages).await?;
        Ok(self.pages())
    }

    async fn create_page(&self, mut draft: Page) -> Result<Page, StoreError> {
        self.enter(StoreOp::CreatePage).await?;
        {
            let mut state = self.lock();
            if let Some(parent) = &draft.parent_id {
                if !state.pages.iter().any(|p| &p.id == parent) {
                    return Err(not_found("page", parent));
                }
            }
            draft.id = state.mint_id("page");
            state.pages.push(draft.clone());
        }
        self.emit(StoreEvent::PageUpserted(draft.clone()));
        Ok(draft)
    }

    async fn update_page(&self, id: &str, patch: PagePatch) -> Result<Page, StoreError> {
        self.enter(StoreOp::UpdatePage).await?;
        let page = {
            let mut state = self.lock();
            if let Some(Some(parent)) = &patch.parent_id {
                if !state.pages.iter().any(|p| &p.id == parent) {
                    return Err(not_found("page", parent));
                }
            }
            let page = state
                .pages
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| not_found("page", id))?;
            patch.apply_to(page);
            page.clone()
        };
        self.emit(StoreEvent::PageUpserted(page.clone()));
        Ok(page)
    }

    async fn delete_page(&self, id: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::DeletePage).await?;
        let (removed_pages, removed_blocks) = {
            let mut state = self.lock();
            if !state.pages.iter().any(|p| p.id == id) {
                return Err(not_found("page", id));
            }

            // Cascade through sub-pages
            let mut doomed: HashSet<String> = HashSet::from([id.to_string()]);
            loop {
                let before = doomed.len();
                for page in &state.pages {
                    if page.parent_id.as_ref().is_some_and(|p| doomed.contains(p)) {
                        doomed.insert(page.id.clone());
                    }
                }
                if doomed.len() == before {
                    break;
                }
            }

            let removed_blocks: Vec<Block> = state
                .blocks
                .iter()
                .filter(|b| doomed.contains(&b.page_id))
                .cloned()
                .collect();
            state.pages.retain(|p| !doomed.contains(&p.id));
            state.blocks.retain(|b| !doomed.contains(&b.page_id));
            (doomed, removed_blocks)
        };

        for block in removed_blocks {
            self.emit(StoreEvent::BlockDeleted {
                id: block.id,
                page_id: block.page_id,
            });
        }
        for id in removed_pages {
            self.emit(StoreEvent::PageDeleted { id });
        }
        Ok(())
    }

    async fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StoreError> {
        self.enter(StoreOp::ListBlocks).await?;
        Ok(self
            .lock()
            .blocks
            .iter()
            .filter(|b| b.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn create_block(&self, mut draft: Block) -> Result<Block, StoreError> {
        self.enter(StoreOp::CreateBlock).await?;
        {
            let mut state = self.lock();
            if !state.pages.iter().any(|p| p.id == draft.page_id) {
                return Err(not_found("page", &draft.page_id));
            }
            if draft.parent_id != draft.page_id && !state.blocks.iter().any(|b| b.id == draft.parent_id) {
                return Err(not_found("block", &draft.parent_id));
            }
            draft.id = state.mint_id("block");
            state.blocks.push(draft.clone());
        }
        self.emit(StoreEvent::BlockUpserted(draft.clone()));
        Ok(draft)
    }

    async fn update_block(&self, id: &str, patch: BlockPatch) -> Result<Block, StoreError> {
        self.enter(StoreOp::UpdateBlock).await?;
        let block = {
            let mut state = self.lock();
            if let Some(parent) = &patch.parent_id {
                let page_id = state.blocks.iter().find(|b| b.id == id).map(|b| b.page_id.clone());
                let known = page_id.as_ref() == Some(parent) || state.blocks.iter().any(|b| &b.id == parent);
                if page_id.is_some() && !known {
                    return Err(not_found("block", parent));
                }
            }
            let block = state
                .blocks
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or_else(|| not_found("block", id))?;
            patch.apply_to(block);
            block.clone()
        };
        self.emit(StoreEvent::BlockUpserted(block.clone()));
        Ok(block)
    }

    async fn delete_block(&self, id: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteBlock).await?;
        let removed: Vec<Block> = {
            let mut state = self.lock();
            if !state.blocks.iter().any(|b| b.id == id) {
                return Err(not_found("block", id));
            }
            let mut doomed = quire_blocks::tree::descendants_of(&state.blocks, id);
            doomed.insert(id.to_string());
            let (removed, kept): (Vec<Block>, Vec<Block>) =
                state.blocks.drain(..).partition(|b| doomed.contains(&b.id));
            state.blocks = kept;
            removed
        };

        for block in removed {
            self.emit(StoreEvent::BlockDeleted {
                id: block.id,
                page_id: block.page_id,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_blocks::BlockType;

    async fn store_with_page() -> (MemoryStore, Page) {
        let store = MemoryStore::new();
        let page = store.create_page(Page::new("draft", "Notes")).await.unwrap();
        (store, page)
    }

    #[tokio::test]
    async fn test_create_assigns_server_ids() {
        let (store, page) = store_with_page().await;
        assert_eq!(page.id, "page-1");

        let block = store
            .create_block(Block::new("temp-1", &page.id, BlockType::Text, &page.id, 0))
            .await
            .unwrap();
        assert_eq!(block.id, "block-2");
        assert_eq!(store.calls(StoreOp::CreateBlock), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_parent() {
        let (store, page) = store_with_page().await;
        let result = store
            .create_block(Block::new("temp-1", &page.id, BlockType::Text, "nope", 0))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { kind: "block", .. })));
    }

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let (store, page) = store_with_page().await;
        store.fail_next(StoreOp::UpdatePage, 1);

        assert!(store.update_page(&page.id, PagePatch::title("a")).await.is_err());
        assert!(store.update_page(&page.id, PagePatch::title("b")).await.is_ok());
        assert_eq!(store.calls(StoreOp::UpdatePage), 2);
        assert_eq!(store.pages()[0].title, "b");
    }

    #[tokio::test]
    async fn test_delete_block_cascades_and_emits() {
        let (store, page) = store_with_page().await;
        let toggle = store
            .create_block(Block::new("t", &page.id, BlockType::ToggleList, &page.id, 0))
            .await
            .unwrap();
        store
            .create_block(Block::new("c", &page.id, BlockType::Text, &toggle.id, 0))
            .await
            .unwrap();

        let mut events = store.subscribe();
        store.delete_block(&toggle.id).await.unwrap();

        assert!(store.blocks().is_empty());
        let mut deleted = 0;
        while let Ok(StoreEvent::BlockDeleted { .. }) = events.try_recv() {
            deleted += 1;
        }
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_delete_page_cascades_to_subpages() {
        let (store, page) = store_with_page().await;
        let child = store
            .create_page(Page::new("draft", "Child").with_parent(&page.id))
            .await
            .unwrap();
        store
            .create_block(Block::new("b", &child.id, BlockType::Text, &child.id, 0))
            .await
            .unwrap();

        store.delete_page(&page.id).await.unwrap();

        assert!(store.pages().is_empty());
        assert!(store.blocks().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (store, page) = store_with_page().await;
        store
            .create_block(Block::new("b", &page.id, BlockType::Text, &page.id, 0).with_text("hi"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), store.snapshot());

        // Ids keep counting past what's already stored
        let next = loaded.create_page(Page::new("draft", "Next")).await.unwrap();
        assert_eq!(next.id, "page-3");
    }

    #[tokio::test]
    async fn test_ids_stay_unique_after_delete_and_reload() {
        let (store, page) = store_with_page().await;
        let first = store
            .create_block(Block::new("a", &page.id, BlockType::Text, &page.id, 0))
            .await
            .unwrap();
        let second = store
            .create_block(Block::new("b", &page.id, BlockType::Text, &page.id, 1))
            .await
            .unwrap();
        store.delete_block(&first.id).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store.save(&path).unwrap();
        let loaded = MemoryStore::load(&path).unwrap();
        let third = loaded
            .create_block(Block::new("c", &page.id, BlockType::Text, &page.id, 2))
            .await
            .unwrap();

        assert_ne!(third.id, second.id);
        assert_eq!(third.id, "block-4");
        let ids: Vec<String> = loaded.blocks().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![second.id, third.id]);
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_parent() {
        let (store, page) = store_with_page().await;
        let block = store
            .create_block(Block::new("a", &page.id, BlockType::Text, &page.id, 0))
            .await
            .unwrap();

        let page_result = store
            .update_page(&page.id, PagePatch::reparent(Some("temp-x-1".into())))
            .await;
        let block_result = store
            .update_block(&block.id, BlockPatch::reparent("temp-x-2", 0))
            .await;

        assert!(matches!(page_result, Err(StoreError::NotFound { kind: "page", .. })));
        assert!(matches!(block_result, Err(StoreError::NotFound { kind: "block", .. })));
        assert_eq!(store.pages()[0].parent_id, None);
        assert_eq!(store.blocks()[0].parent_id, page.id);
    }
}
