//! # Optimistic mutation reconciler
//!
//! Every page and block mutation is applied to the local overlay first and
//! sent to the store afterwards. The store's answer settles the pending
//! operation:
//!
//! | Operation          | Success                      | Failure                        |
//! |--------------------|------------------------------|--------------------------------|
//! | create             | temp id → server id          | drop it and everything on it   |
//! | simple update      | adopt server copy            | revert that update only        |
//! | structural update  | adopt server copy            | revert every pending operation |
//! | delete             | drop from base               | revert every pending operation |
//!
//! Validation runs before anything is touched, so a rejected move leaves
//! the projection exactly as it was. Lock guards are never held across an
//! `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use quire_blocks::tree::{descendants_of, next_pos, reachable};
use quire_blocks::{
    reorder, validate_block_parent, validate_page_parent, Block, BlockPatch, BlockType,
    NestingRules, Page, PagePatch, PositionUpdate, PropertyRegistry, PropertySchema, PropertyValue,
    TempIdGenerator, ValidationError,
};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::config::EditorConfig;
use crate::errors::EditorError;
use crate::overlay::{OpId, Overlay, PendingOp};
use crate::store::{Persisted, RemoteStore, StoreEvent};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A block the user asked for. `parent_id` defaults to the page root and
/// `pos` to the end of the sibling list.
#[derive(Debug, Clone)]
pub struct BlockDraft {
    pub page_id: String,
    pub block_type: BlockType,
    pub parent_id: Option<String>,
    pub pos: Option<i64>,
    pub content: Value,
}

impl BlockDraft {
    pub fn new(page_id: impl Into<String>, block_type: BlockType) -> Self {
        Self {
            page_id: page_id.into(),
            block_type,
            parent_id: None,
            pos: None,
            content: Value::Object(Default::default()),
        }
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn at(mut self, pos: i64) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_text(self, html: &str) -> Self {
        self.with_content(serde_json::json!({ "text": html }))
    }
}

/// A create that is visible locally but not yet sent
#[derive(Debug, Clone)]
pub struct PendingCreate<E> {
    pub op_id: OpId,
    pub temp_id: String,
    pub entity: E,
}

/// Per-entity result of a batch reorder
#[derive(Debug, Default)]
pub struct ReorderOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<(String, EditorError)>,
}

impl ReorderOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    config: EditorConfig,
    rules: NestingRules,
    ids: Mutex<TempIdGenerator>,
    pages: RwLock<Overlay<Page>>,
    blocks: RwLock<Overlay<Block>>,
    /// Temporary ids deleted while their create was in flight
    cancelled: Mutex<HashSet<String>>,
    events: Mutex<broadcast::Receiver<StoreEvent>>,
    registry: Arc<PropertyRegistry>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, client_id: &str, config: EditorConfig) -> Self {
        let events = store.subscribe();
        Self {
            ids: Mutex::new(TempIdGenerator::with_prefix(&config.temp_id_prefix, client_id)),
            rules: config.nesting_rules(),
            config,
            store,
            pages: RwLock::new(Overlay::new()),
            blocks: RwLock::new(Overlay::new()),
            cancelled: Mutex::new(HashSet::new()),
            events: Mutex::new(events),
            registry: Arc::new(PropertyRegistry::with_builtins()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<PropertyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn mint_id(&self) -> String {
        lock(&self.ids).next_id()
    }

    // -- Reads ---------------------------------------------------------------

    /// Projected pages, leaving out any whose ancestor is gone
    pub fn pages(&self) -> Vec<Page> {
        let projected = read(&self.pages).project();
        let by_id: HashMap<&str, &Page> = projected.iter().map(|p| (p.id.as_str(), p)).collect();
        let attached = |page: &Page| {
            let mut seen = HashSet::new();
            let mut current = page.parent_id.as_deref();
            while let Some(parent) = current {
                if !seen.insert(parent) {
                    return false;
                }
                match by_id.get(parent) {
                    Some(found) => current = found.parent_id.as_deref(),
                    None => return false,
                }
            }
            true
        };
        projected.iter().filter(|page| attached(page)).cloned().collect()
    }

    pub fn page(&self, id: &str) -> Option<Page> {
        self.pages().into_iter().find(|page| page.id == id)
    }

    /// Projected blocks of one page that are still connected to its root
    pub fn blocks(&self, page_id: &str) -> Vec<Block> {
        let projected: Vec<Block> = read(&self.blocks)
            .project()
            .into_iter()
            .filter(|block| block.page_id == page_id)
            .collect();
        reachable(&projected, page_id).into_iter().cloned().collect()
    }

    pub fn block(&self, id: &str) -> Option<Block> {
        read(&self.blocks).get(id)
    }

    /// Unsettled operations across pages and blocks
    pub fn pending_count(&self) -> usize {
        read(&self.pages).pending_count() + read(&self.blocks).pending_count()
    }

    /// Whether `id` has a write in flight (drives "syncing" indicators)
    pub fn is_pending(&self, id: &str) -> bool {
        read(&self.pages).is_pending(id) || read(&self.blocks).is_pending(id)
    }

    // -- Server truth --------------------------------------------------------

    pub async fn load_pages(&self) -> Result<Vec<Page>, EditorError> {
        let pages = self.store.list_pages().await?;
        debug!(count = pages.len(), "loaded pages");
        write(&self.pages).replace_base(pages);
        Ok(self.pages())
    }

    /// Refetch one page's blocks. Pending operations stay on top.
    pub async fn refresh(&self, page_id: &str) -> Result<Vec<Block>, EditorError> {
        let blocks = self.store.list_blocks(page_id).await?;
        debug!(page_id, count = blocks.len(), "loaded blocks");
        write(&self.blocks).replace_base_where(|block| block.page_id == page_id, blocks);
        Ok(self.blocks(page_id))
    }

    /// Fold in a change made elsewhere
    pub fn apply_store_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::PageUpserted(page) => {
                if let Some(settled) = write(&self.pages).adopt_server(page) {
                    debug!(temp_id = %settled.temp_id, server_id = %settled.server_id, "page create settled by realtime echo");
                }
            }
            StoreEvent::PageDeleted { id } => {
                write(&self.pages).remove_from_base(&id);
            }
            StoreEvent::BlockUpserted(block) => self.adopt_block(block),
            StoreEvent::BlockDeleted { id, .. } => {
                write(&self.blocks).remove_from_base(&id);
            }
        }
    }

    /// Adopt a block written outside the overlay (text sessions, realtime)
    pub fn adopt_block(&self, block: Block) {
        if let Some(settled) = write(&self.blocks).adopt_server(block) {
            debug!(temp_id = %settled.temp_id, server_id = %settled.server_id, "block create settled by realtime echo");
        }
    }

    /// Apply every queued realtime event. Returns how many were applied.
    pub fn drain_events(&self) -> usize {
        let mut queued = Vec::new();
        {
            let mut receiver = lock(&self.events);
            loop {
                match receiver.try_recv() {
                    Ok(event) => queued.push(event),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "realtime events dropped, refresh to catch up");
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        let count = queued.len();
        for event in queued {
            self.apply_store_event(event);
        }
        count
    }

    // -- Generic settle paths ------------------------------------------------

    async fn send_create<E: Persisted>(&self, overlay: &RwLock<Overlay<E>>, pending: PendingCreate<E>) -> Result<E, EditorError> {
        let PendingCreate { op_id, temp_id, entity } = pending;

        let server = match E::create(self.store.as_ref(), entity).await {
            Ok(server) => server,
            Err(err) => {
                lock(&self.cancelled).remove(&temp_id);
                let reverted = write(overlay).revert(op_id);
                warn!(kind = E::KIND, %temp_id, dropped = reverted.len(), error = %err, "create failed, rolled back");
                return Err(err.into());
            }
        };

        if lock(&self.cancelled).remove(&temp_id) {
            info!(kind = E::KIND, %temp_id, server_id = server.id(), "create cancelled in flight, deleting server copy");
            if let Err(err) = E::delete(self.store.as_ref(), server.id()).await {
                warn!(kind = E::KIND, server_id = server.id(), error = %err, "could not delete cancelled create");
            }
            write(overlay).remove_from_base(server.id());
            return Err(EditorError::Cancelled(temp_id));
        }

        let released = {
            let mut overlay = write(overlay);
            overlay.settle_create(server.clone(), Some(&temp_id));
            overlay.release_deferred(server.id())
        };
        info!(kind = E::KIND, %temp_id, server_id = server.id(), "create confirmed");

        for (op_id, patch) in released {
            // Failures are already rolled back and logged
            let _ = self.send_update(overlay, op_id, server.id(), patch, false).await;
        }
        Ok(read(overlay).get(server.id()).unwrap_or(server))
    }

    /// Queue a patch. Patches for entities that don't have a server id yet
    /// are held until their create confirms.
    async fn run_update<E: Persisted>(&self, overlay: &RwLock<Overlay<E>>, id: &str, patch: E::Patch) -> Result<E, EditorError> {
        let (op_id, structural, deferred) = {
            let mut overlay = write(overlay);
            let current = overlay
                .get(id)
                .ok_or_else(|| EditorError::NotFound(id.to_string()))?;
            let structural = current.is_structural(&patch);
            let deferred = self.config.is_temporary(id);
            let op_id = overlay
                .begin_update(id, patch.clone(), deferred)
                .ok_or_else(|| EditorError::NotFound(id.to_string()))?;
            (op_id, structural, deferred)
        };

        if deferred {
            debug!(kind = E::KIND, id, "update held until create confirms");
            return read(overlay)
                .get(id)
                .ok_or_else(|| EditorError::NotFound(id.to_string()));
        }
        self.send_update(overlay, op_id, id, patch, structural).await
    }

    async fn send_update<E: Persisted>(
        &self,
        overlay: &RwLock<Overlay<E>>,
        op_id: OpId,
        id: &str,
        patch: E::Patch,
        structural: bool,
    ) -> Result<E, EditorError> {
        match E::update(self.store.as_ref(), id, patch).await {
            Ok(server) => {
                if write(overlay).confirm_update(op_id, server.clone()) {
                    info!(kind = E::KIND, id, "update confirmed");
                } else {
                    debug!(kind = E::KIND, id, op_id, "late update response ignored");
                }
                Ok(server)
            }
            Err(err) if structural => {
                let reverted = write(overlay).revert_all();
                error!(kind = E::KIND, id, reverted = reverted.len(), error = %err, "move failed, reverted all pending changes");
                Err(err.into())
            }
            Err(err) => {
                write(overlay).revert(op_id);
                warn!(kind = E::KIND, id, error = %err, "update failed, reverted");
                Err(err.into())
            }
        }
    }

    async fn run_delete<E: Persisted>(&self, overlay: &RwLock<Overlay<E>>, id: &str) -> Result<(), EditorError> {
        if self.config.is_temporary(id) {
            return self.cancel_create(overlay, id);
        }

        let op_id = write(overlay)
            .begin_delete(id)
            .ok_or_else(|| EditorError::NotFound(id.to_string()))?;

        match E::delete(self.store.as_ref(), id).await {
            Ok(()) => {
                write(overlay).confirm_delete(op_id);
                info!(kind = E::KIND, id, "delete confirmed");
                Ok(())
            }
            Err(err) => {
                let reverted = write(overlay).revert_all();
                error!(kind = E::KIND, id, reverted = reverted.len(), error = %err, "delete failed, reverted all pending changes");
                Err(err.into())
            }
        }
    }

    /// Deleting something that was never saved drops its create. If the
    /// create is already in flight the server copy is removed on arrival.
    fn cancel_create<E: Persisted>(&self, overlay: &RwLock<Overlay<E>>, id: &str) -> Result<(), EditorError> {
        let mut overlay = write(overlay);
        let op_id = overlay
            .pending()
            .iter()
            .find(|op| matches!(op, PendingOp::Create { entity, .. } if entity.id() == id))
            .map(|op| op.op_id())
            .ok_or_else(|| EditorError::NotFound(id.to_string()))?;
        let dropped = overlay.revert(op_id);
        lock(&self.cancelled).insert(id.to_string());
        info!(kind = E::KIND, id, dropped = dropped.len(), "unsaved create cancelled");
        Ok(())
    }

    async fn run_reorder<E: Persisted>(&self, overlay: &RwLock<Overlay<E>>, updates: Vec<PositionUpdate>) -> ReorderOutcome {
        let mut outcome = ReorderOutcome::default();
        let mut sends = Vec::new();
        {
            let mut overlay = write(overlay);
            for update in updates {
                let deferred = self.config.is_temporary(&update.id);
                match overlay.begin_update(&update.id, E::pos_patch(update.pos), deferred) {
                    Some(_) if deferred => outcome.applied.push(update.id),
                    Some(op_id) => sends.push((op_id, update)),
                    None => outcome
                        .failed
                        .push((update.id.clone(), EditorError::NotFound(update.id))),
                }
            }
        }

        let results = join_all(sends.iter().map(|(op_id, update)| {
            self.send_update(overlay, *op_id, &update.id, E::pos_patch(update.pos), false)
        }))
        .await;

        for ((_, update), result) in sends.into_iter().zip(results) {
            match result {
                Ok(_) => outcome.applied.push(update.id),
                Err(err) => outcome.failed.push((update.id, err)),
            }
        }
        if !outcome.is_complete() {
            warn!(kind = E::KIND, failed = outcome.failed.len(), applied = outcome.applied.len(), "reorder partially applied");
        }
        outcome
    }

    // -- Pages ---------------------------------------------------------------

    pub async fn create_page(&self, title: &str, parent_id: Option<&str>) -> Result<Page, EditorError> {
        let pages = self.pages();
        if let Some(parent) = parent_id {
            if self.config.is_temporary(parent) {
                return Err(ValidationError::ParentNotPersisted(parent.to_string()).into());
            }
            if !pages.iter().any(|page| page.id == parent) {
                return Err(ValidationError::ParentNotFound(parent.to_string()).into());
            }
        }
        let siblings: Vec<&Page> = pages
            .iter()
            .filter(|page| page.parent_id.as_deref() == parent_id)
            .collect();

        let mut draft = Page::new(self.mint_id(), title).with_pos(next_pos(&siblings));
        draft.parent_id = parent_id.map(str::to_string);
        // Reject a parent that is already at the depth limit
        let mut with_draft = pages.clone();
        with_draft.push(Page { parent_id: None, ..draft.clone() });
        validate_page_parent(&with_draft, &draft.id, parent_id, &self.rules)?;

        let temp_id = draft.id.clone();
        let op_id = write(&self.pages).begin_create(draft.clone());
        debug!(%temp_id, "page created locally");
        self.send_create(&self.pages, PendingCreate { op_id, temp_id, entity: draft }).await
    }

    pub async fn update_page(&self, id: &str, patch: PagePatch) -> Result<Page, EditorError> {
        if let Some(parent) = &patch.parent_id {
            if let Some(parent) = parent.as_deref().filter(|p| self.config.is_temporary(p)) {
                return Err(ValidationError::ParentNotPersisted(parent.to_string()).into());
            }
            validate_page_parent(&self.pages(), id, parent.as_deref(), &self.rules)?;
        }
        self.run_update(&self.pages, id, patch).await
    }

    pub async fn rename_page(&self, id: &str, title: &str) -> Result<Page, EditorError> {
        self.update_page(id, PagePatch::title(title)).await
    }

    /// Reparent a page (`None` = top level), appended after its new siblings
    pub async fn move_page(&self, id: &str, new_parent: Option<&str>) -> Result<Page, EditorError> {
        let pages = self.pages();
        if let Some(parent) = new_parent.filter(|p| self.config.is_temporary(p)) {
            return Err(ValidationError::ParentNotPersisted(parent.to_string()).into());
        }
        validate_page_parent(&pages, id, new_parent, &self.rules)?;

        let siblings: Vec<&Page> = pages
            .iter()
            .filter(|page| page.parent_id.as_deref() == new_parent && page.id != id)
            .collect();
        let patch = PagePatch {
            parent_id: Some(new_parent.map(str::to_string)),
            pos: Some(next_pos(&siblings)),
            ..Default::default()
        };
        self.run_update(&self.pages, id, patch).await
    }

    pub async fn delete_page(&self, id: &str) -> Result<(), EditorError> {
        self.run_delete(&self.pages, id).await
    }

    /// Move the page at sorted index `from` among `parent`'s children to `to`
    pub async fn reorder_pages(&self, parent_id: Option<&str>, from: usize, to: usize) -> ReorderOutcome {
        let pages = self.pages();
        let siblings: Vec<&Page> = pages
            .iter()
            .filter(|page| page.parent_id.as_deref() == parent_id)
            .collect();
        let updates = reorder(&siblings, from, to);
        self.run_reorder(&self.pages, updates).await
    }

    /// Parse raw input for a page property and store it. Invalid input is
    /// rejected before the page changes.
    pub async fn set_page_property(&self, page_id: &str, schema: &PropertySchema, raw: &str) -> Result<Page, EditorError> {
        let value = self.registry.parse_input(schema, raw)?;
        self.update_page(page_id, PagePatch::property(schema.name.clone(), value))
            .await
    }

    /// Display string of a stored page property
    pub fn display_property(&self, page_id: &str, schema: &PropertySchema) -> Result<String, EditorError> {
        let page = self
            .page(page_id)
            .ok_or_else(|| EditorError::NotFound(page_id.to_string()))?;
        let value = page.properties.get(&schema.name).cloned().unwrap_or(PropertyValue::Empty);
        Ok(self.registry.display(schema, &value)?)
    }

    // -- Blocks --------------------------------------------------------------

    /// Validate a draft and show it under a temporary id. Call
    /// [`Reconciler::finish_create_block`] to send it.
    pub fn begin_create_block(&self, draft: BlockDraft) -> Result<PendingCreate<Block>, EditorError> {
        let parent_id = draft.parent_id.unwrap_or_else(|| draft.page_id.clone());
        if self.config.is_temporary(&parent_id) {
            return Err(ValidationError::ParentNotPersisted(parent_id).into());
        }

        let blocks = self.blocks(&draft.page_id);
        validate_block_parent(&blocks, &draft.page_id, None, &parent_id, &self.rules)?;

        let pos = draft.pos.unwrap_or_else(|| {
            let siblings: Vec<&Block> = blocks.iter().filter(|b| b.parent_id == parent_id).collect();
            next_pos(&siblings)
        });
        let block = Block::new(self.mint_id(), draft.page_id, draft.block_type, parent_id, pos)
            .with_content(draft.content);

        let temp_id = block.id.clone();
        let op_id = write(&self.blocks).begin_create(block.clone());
        debug!(%temp_id, block_type = %block.block_type, "block created locally");
        Ok(PendingCreate { op_id, temp_id, entity: block })
    }

    pub async fn finish_create_block(&self, pending: PendingCreate<Block>) -> Result<Block, EditorError> {
        self.send_create(&self.blocks, pending).await
    }

    pub async fn create_block(&self, draft: BlockDraft) -> Result<Block, EditorError> {
        let pending = self.begin_create_block(draft)?;
        self.finish_create_block(pending).await
    }

    /// Simple or structural patch; a parent change is validated first
    pub async fn update_block(&self, id: &str, patch: BlockPatch) -> Result<Block, EditorError> {
        if let Some(parent) = &patch.parent_id {
            let block = self
                .block(id)
                .ok_or_else(|| EditorError::NotFound(id.to_string()))?;
            if self.config.is_temporary(parent) {
                return Err(ValidationError::ParentNotPersisted(parent.clone()).into());
            }
            validate_block_parent(&self.blocks(&block.page_id), &block.page_id, Some(id), parent, &self.rules)?;
        }
        self.run_update(&self.blocks, id, patch).await
    }

    /// Move a block under `new_parent` (a container or the page itself)
    pub async fn move_block(&self, id: &str, new_parent: &str, pos: Option<i64>) -> Result<Block, EditorError> {
        let block = self
            .block(id)
            .ok_or_else(|| EditorError::NotFound(id.to_string()))?;
        let pos = pos.unwrap_or_else(|| {
            let blocks = self.blocks(&block.page_id);
            let siblings: Vec<&Block> = blocks
                .iter()
                .filter(|b| b.parent_id == new_parent && b.id != id)
                .collect();
            next_pos(&siblings)
        });
        self.update_block(id, BlockPatch::reparent(new_parent, pos)).await
    }

    /// Delete a block; its descendants disappear from the projection with it
    pub async fn delete_block(&self, id: &str) -> Result<(), EditorError> {
        let subtree = self
            .block(id)
            .map(|block| descendants_of(&self.blocks(&block.page_id), id))
            .unwrap_or_default();
        self.run_delete(&self.blocks, id).await?;

        let mut overlay = write(&self.blocks);
        for descendant in &subtree {
            overlay.remove_from_base(descendant);
        }
        Ok(())
    }

    /// Move the child at sorted index `from` under `parent_id` to `to`. One
    /// update per changed block, sent concurrently; each succeeds or fails
    /// on its own.
    pub async fn reorder_blocks(&self, page_id: &str, parent_id: &str, from: usize, to: usize) -> ReorderOutcome {
        let blocks = self.blocks(page_id);
        let siblings: Vec<&Block> = blocks.iter().filter(|b| b.parent_id == parent_id).collect();
        let updates = reorder(&siblings, from, to);
        debug!(page_id, parent_id, from, to, updates = updates.len(), "reordering blocks");
        self.run_reorder(&self.blocks, updates).await
    }
}
