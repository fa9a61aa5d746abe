//! # Text sessions
//!
//! One `TextSession` per block being edited by this client. It mediates
//! between the editing surface (HTML), the shared CRDT text and the store:
//!
//! ```text
//! surface ──on_local_input──▶ CRDT ──(debounce)──▶ store.update_block
//!    ▲                         │
//!    └──────poll_remote────────┘  (changes from other clients only)
//! ```
//!
//! Time is passed in explicitly, so debouncing is deterministic. A session
//! on a temporary (unsaved) block edits its CRDT text but never writes to
//! the store until it is re-keyed to the server id.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quire_blocks::{is_temporary_id, Block, BlockPatch};
use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::crdt::{CollabHub, CollabText, SessionKey, YrsText};
use crate::errors::EditorError;
use crate::store::RemoteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    /// A write is scheduled
    Pending,
    Saving,
    Saved,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Viewing,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Block only exists on this client so far
    Temporary,
    Persisted,
}

/// Single-deadline debounce. Re-arming pushes the deadline back.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

pub struct TextSession {
    key: SessionKey,
    text: Box<dyn CollabText>,
    /// Content currently shown on the surface
    displayed: String,
    /// Content the store is known to hold
    last_synced: String,
    dirty: bool,
    mode: Mode,
    lifecycle: Lifecycle,
    status: SyncStatus,
    debounce: Debouncer,
    temp_id_prefix: String,
}

impl TextSession {
    /// Connect `text` to the key's room. An empty room is seeded with the
    /// stored HTML; otherwise the shared content wins.
    pub fn open(
        key: SessionKey,
        mut text: Box<dyn CollabText>,
        stored_html: &str,
        config: &EditorConfig,
    ) -> Result<Self, EditorError> {
        text.connect(&key)?;

        let shared = text.get_text();
        let displayed = if shared.is_empty() && !stored_html.is_empty() {
            text.set_text(stored_html)?;
            stored_html.to_string()
        } else {
            shared
        };

        let lifecycle = if config.is_temporary(&key.block_id) {
            Lifecycle::Temporary
        } else {
            Lifecycle::Persisted
        };
        debug!(%key, ?lifecycle, "opened text session");

        Ok(Self {
            key,
            text,
            last_synced: displayed.clone(),
            displayed,
            dirty: false,
            mode: Mode::Viewing,
            lifecycle,
            status: SyncStatus::Idle,
            debounce: Debouncer::new(config.debounce()),
            temp_id_prefix: config.temp_id_prefix.clone(),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn content(&self) -> &str {
        &self.displayed
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_connected(&self) -> bool {
        self.text.is_connected()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// The user changed the surface
    pub fn on_local_input(&mut self, html: &str, now: Instant) -> Result<(), EditorError> {
        self.mode = Mode::Editing;
        if html == self.displayed {
            return Ok(());
        }
        self.text.set_text(html)?;
        self.displayed = html.to_string();
        self.content_changed(now);
        Ok(())
    }

    /// Pull in edits from other clients. Returns whether the content changed.
    pub fn poll_remote(&mut self, now: Instant) -> Result<bool, EditorError> {
        let changes = self.text.poll_changes()?;
        let Some(latest) = changes.last() else {
            return Ok(false);
        };
        if latest.text == self.displayed {
            return Ok(false);
        }
        debug!(key = %self.key, origin = %latest.origin, "remote text change");
        self.displayed = latest.text.clone();
        self.content_changed(now);
        Ok(true)
    }

    fn content_changed(&mut self, now: Instant) {
        self.dirty = self.displayed != self.last_synced;
        if !self.dirty {
            self.debounce.cancel();
            if self.status == SyncStatus::Pending {
                self.status = SyncStatus::Idle;
            }
            return;
        }
        if self.lifecycle == Lifecycle::Persisted {
            self.debounce.arm(now);
            self.status = SyncStatus::Pending;
        }
    }

    /// Write once the debounce window has passed. Returns the stored block
    /// when a write happened.
    pub async fn flush_due(&mut self, now: Instant, store: &dyn RemoteStore) -> Result<Option<Block>, EditorError> {
        if !self.debounce.is_due(now) {
            return Ok(None);
        }
        self.debounce.cancel();
        self.persist(now, store).await
    }

    /// Leave edit mode, syncing right away if the surface and CRDT disagree
    /// or a write is still scheduled
    pub async fn blur(
        &mut self,
        surface_html: &str,
        now: Instant,
        store: &dyn RemoteStore,
    ) -> Result<Option<Block>, EditorError> {
        if surface_html != self.text.get_text() {
            self.on_local_input(surface_html, now)?;
        }
        self.mode = Mode::Viewing;

        if self.lifecycle == Lifecycle::Temporary || !(self.dirty || self.debounce.is_armed()) {
            return Ok(None);
        }
        self.debounce.cancel();
        self.persist(now, store).await
    }

    async fn persist(&mut self, now: Instant, store: &dyn RemoteStore) -> Result<Option<Block>, EditorError> {
        if self.lifecycle == Lifecycle::Temporary {
            return Ok(None);
        }

        let content = self.displayed.clone();
        self.status = SyncStatus::Saving;
        match store.update_block(&self.key.block_id, BlockPatch::text(content.clone())).await {
            Ok(block) => {
                self.last_synced = content;
                self.dirty = self.displayed != self.last_synced;
                self.status = SyncStatus::Saved;
                debug!(key = %self.key, "text saved");
                Ok(Some(block))
            }
            Err(error) => {
                warn!(key = %self.key, %error, "text save failed, will retry");
                self.status = SyncStatus::Error(error.to_string());
                self.dirty = true;
                self.debounce.arm(now);
                Err(error.into())
            }
        }
    }

    /// Re-bind to a new block id (a temporary block got its server id).
    /// Current text is carried into the new room. On failure the session
    /// rejoins its old room.
    pub fn rekey(&mut self, block_id: &str, now: Instant) -> Result<(), EditorError> {
        let key = SessionKey::new(self.key.page_id.clone(), block_id);
        if let Err(error) = self.text.connect(&key) {
            warn!(from = %self.key, to = %key, %error, "re-key failed, rejoining old room");
            if let Err(rejoin) = self.text.connect(&self.key) {
                warn!(key = %self.key, error = %rejoin, "could not rejoin old room");
            }
            return Err(error.into());
        }
        info!(from = %self.key, to = %key, "text session re-keyed");

        self.key = key;
        self.lifecycle = if is_temporary_id(block_id, &self.temp_id_prefix) {
            Lifecycle::Temporary
        } else {
            Lifecycle::Persisted
        };
        self.displayed = self.text.get_text();
        self.content_changed(now);
        Ok(())
    }

    pub fn close(mut self) {
        self.text.disconnect();
        debug!(key = %self.key, "closed text session");
    }
}

/// Creates the `CollabText` behind each new session
pub type TextFactory = Arc<dyn Fn() -> Box<dyn CollabText> + Send + Sync>;

/// Outcome of flushing every due session
#[derive(Debug, Default)]
pub struct FlushReport {
    pub written: Vec<Block>,
    pub failed: Vec<(SessionKey, EditorError)>,
}

/// Open text sessions of one client, keyed by `(page_id, block_id)`
pub struct SessionManager {
    config: EditorConfig,
    factory: TextFactory,
    sessions: HashMap<SessionKey, TextSession>,
}

impl SessionManager {
    /// Sessions backed by yrs replicas relayed through `hub`
    pub fn new(client_id: &str, hub: Arc<CollabHub>, config: EditorConfig) -> Self {
        let client_id = client_id.to_string();
        let factory: TextFactory = Arc::new(move || {
            Box::new(YrsText::new(client_id.clone(), hub.clone())) as Box<dyn CollabText>
        });
        Self::with_factory(config, factory)
    }

    pub fn with_factory(config: EditorConfig, factory: TextFactory) -> Self {
        Self {
            config,
            factory,
            sessions: HashMap::new(),
        }
    }

    /// Open (or return the already open) session for a block
    pub fn open(&mut self, page_id: &str, block_id: &str, stored_html: &str) -> Result<&mut TextSession, EditorError> {
        match self.sessions.entry(SessionKey::new(page_id, block_id)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let session = TextSession::open(entry.key().clone(), (self.factory)(), stored_html, &self.config)?;
                Ok(entry.insert(session))
            }
        }
    }

    pub fn get(&self, page_id: &str, block_id: &str) -> Option<&TextSession> {
        self.sessions.get(&SessionKey::new(page_id, block_id))
    }

    pub fn get_mut(&mut self, page_id: &str, block_id: &str) -> Option<&mut TextSession> {
        self.sessions.get_mut(&SessionKey::new(page_id, block_id))
    }

    pub fn close(&mut self, page_id: &str, block_id: &str) -> bool {
        match self.sessions.remove(&SessionKey::new(page_id, block_id)) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Move the session for `old_id` to `new_id`. Returns false when no
    /// session was open for `old_id`.
    pub fn rekey(&mut self, page_id: &str, old_id: &str, new_id: &str, now: Instant) -> Result<bool, EditorError> {
        let old_key = SessionKey::new(page_id, old_id);
        let Some(mut session) = self.sessions.remove(&old_key) else {
            return Ok(false);
        };
        if let Err(error) = session.rekey(new_id, now) {
            self.sessions.insert(old_key, session);
            return Err(error);
        }
        self.sessions.insert(session.key().clone(), session);
        Ok(true)
    }

    /// Poll every session for remote edits; returns how many changed
    pub fn poll_remote(&mut self, now: Instant) -> usize {
        let mut changed = 0;
        for session in self.sessions.values_mut() {
            match session.poll_remote(now) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(error) => warn!(key = %session.key(), %error, "failed to apply remote text"),
            }
        }
        changed
    }

    pub async fn flush_all_due(&mut self, now: Instant, store: &dyn RemoteStore) -> FlushReport {
        let mut report = FlushReport::default();
        for session in self.sessions.values_mut() {
            match session.flush_due(now, store).await {
                Ok(Some(block)) => report.written.push(block),
                Ok(None) => {}
                Err(error) => report.failed.push((session.key().clone(), error)),
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SessionKey> {
        self.sessions.keys()
    }
}
