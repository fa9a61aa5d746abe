//! # Page editor
//!
//! Binds one page's blocks, text sessions and renderer together. A block
//! being edited shows its session text instead of the last stored copy.

use std::sync::Arc;
use std::time::Instant;

use quire_blocks::tree::descendants_of;
use quire_blocks::{render_page, Block, BlockPatch, RenderOptions};
use quire_document::{apply_markdown_shortcut, parse, render, Cursor, Shortcut};
use tracing::{debug, warn};

use crate::errors::EditorError;
use crate::reconciler::{BlockDraft, Reconciler, ReorderOutcome};
use crate::session::{FlushReport, SessionManager, TextSession};

pub struct PageEditor {
    page_id: String,
    reconciler: Arc<Reconciler>,
    sessions: SessionManager,
}

impl PageEditor {
    pub fn new(page_id: impl Into<String>, reconciler: Arc<Reconciler>, sessions: SessionManager) -> Self {
        Self {
            page_id: page_id.into(),
            reconciler,
            sessions,
        }
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Fetch the page's blocks from the store
    pub async fn load(&self) -> Result<Vec<Block>, EditorError> {
        self.reconciler.refresh(&self.page_id).await
    }

    /// Projected blocks as stored, without open session text
    pub fn blocks(&self) -> Vec<Block> {
        self.reconciler.blocks(&self.page_id)
    }

    /// Projected blocks with the text of every open session
    pub fn view(&self) -> Vec<Block> {
        let mut blocks = self.blocks();
        for block in &mut blocks {
            if let Some(session) = self.sessions.get(&self.page_id, &block.id) {
                if session.content() != block.text_html() {
                    BlockPatch::text(session.content()).apply_to(block);
                }
            }
        }
        blocks
    }

    pub fn render(&self, options: &RenderOptions) -> String {
        render_page(&self.view(), &self.page_id, options)
    }

    pub fn session(&self, block_id: &str) -> Option<&TextSession> {
        self.sessions.get(&self.page_id, block_id)
    }

    /// Create a block. Text blocks get a session right away, under the
    /// temporary id, moved to the server id once the create confirms.
    pub async fn add_block(&mut self, draft: BlockDraft, now: Instant) -> Result<Block, EditorError> {
        let draft = BlockDraft {
            page_id: self.page_id.clone(),
            ..draft
        };
        let pending = self.reconciler.begin_create_block(draft)?;
        let temp_id = pending.temp_id.clone();
        let text_bearing = pending.entity.block_type.is_text_bearing();
        if text_bearing {
            self.sessions
                .open(&self.page_id, &temp_id, pending.entity.text_html())?;
        }

        match self.reconciler.finish_create_block(pending).await {
            Ok(block) => {
                if text_bearing {
                    self.sessions.rekey(&self.page_id, &temp_id, &block.id, now)?;
                }
                Ok(block)
            }
            Err(err) => {
                self.sessions.close(&self.page_id, &temp_id);
                Err(err)
            }
        }
    }

    fn open_session(&mut self, block_id: &str) -> Result<&mut TextSession, EditorError> {
        let block = self
            .reconciler
            .block(block_id)
            .filter(|block| block.page_id == self.page_id)
            .ok_or_else(|| EditorError::NotFound(block_id.to_string()))?;
        self.sessions.open(&self.page_id, block_id, block.text_html())
    }

    /// Open the block's text session, joining anyone already editing it
    pub fn focus(&mut self, block_id: &str) -> Result<&TextSession, EditorError> {
        self.open_session(block_id).map(|session| &*session)
    }

    /// Local keystrokes for a text block; saved once the debounce passes
    pub fn edit_text(&mut self, block_id: &str, html: &str, now: Instant) -> Result<(), EditorError> {
        self.open_session(block_id)?.on_local_input(html, now)
    }

    /// Run markdown shortcuts on a block's current text. Returns the
    /// adjusted cursor when something fired.
    pub fn apply_shortcuts(&mut self, block_id: &str, cursor: Cursor, now: Instant) -> Result<Option<(Cursor, Vec<Shortcut>)>, EditorError> {
        let session = self.open_session(block_id)?;
        let document = parse(session.content());
        let Some(outcome) = apply_markdown_shortcut(&document, cursor) else {
            return Ok(None);
        };
        session.on_local_input(&render(&outcome.document), now)?;
        debug!(block_id, applied = ?outcome.applied, "markdown shortcut applied");
        Ok(Some((outcome.cursor, outcome.applied)))
    }

    /// Pull realtime changes, apply remote text and write whatever is due
    pub async fn tick(&mut self, now: Instant) -> FlushReport {
        self.reconciler.drain_events();
        self.sessions.poll_remote(now);

        let store = self.reconciler.store().clone();
        let report = self.sessions.flush_all_due(now, store.as_ref()).await;
        for block in &report.written {
            self.reconciler.adopt_block(block.clone());
        }
        for (key, error) in &report.failed {
            warn!(%key, %error, "text save failed");
        }
        report
    }

    /// Leave a text block, saving immediately if needed
    pub async fn blur(&mut self, block_id: &str, surface_html: &str, now: Instant) -> Result<Option<Block>, EditorError> {
        let store = self.reconciler.store().clone();
        let session = self
            .sessions
            .get_mut(&self.page_id, block_id)
            .ok_or_else(|| EditorError::SessionNotFound(block_id.to_string()))?;
        let written = session.blur(surface_html, now, store.as_ref()).await?;
        if let Some(block) = &written {
            self.reconciler.adopt_block(block.clone());
        }
        Ok(written)
    }

    pub async fn move_block(&mut self, block_id: &str, new_parent: &str, pos: Option<i64>) -> Result<Block, EditorError> {
        self.reconciler.move_block(block_id, new_parent, pos).await
    }

    pub async fn reorder(&mut self, parent_id: &str, from: usize, to: usize) -> ReorderOutcome {
        self.reconciler
            .reorder_blocks(&self.page_id, parent_id, from, to)
            .await
    }

    /// Delete a block and close the sessions of everything under it
    pub async fn delete_block(&mut self, block_id: &str) -> Result<(), EditorError> {
        let mut subtree = descendants_of(&self.blocks(), block_id);
        subtree.insert(block_id.to_string());

        self.reconciler.delete_block(block_id).await?;
        for id in &subtree {
            self.sessions.close(&self.page_id, id);
        }
        Ok(())
    }

    /// Close every session of this page
    pub fn close(mut self) {
        let keys: Vec<_> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.sessions.close(&key.page_id, &key.block_id);
        }
    }
}
