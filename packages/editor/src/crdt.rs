//! # Collaborative text
//!
//! Each text-bearing block has one shared Yjs text per `(page_id, block_id)`.
//! Clients keep a local replica and exchange binary v1 updates through a
//! `CollabHub` room. Editors only see the narrow `CollabText` interface, so
//! the yrs-backed `YrsText` can be swapped for any other implementation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, OffsetKind, Options, ReadTxn, StateVector, Text, TextRef, Transact, Update};

/// Errors that can occur during CRDT operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrdtError {
    #[error("Failed to decode: {0}")]
    DecodeError(String),

    #[error("Failed to apply update: {0}")]
    ApplyError(String),
}

/// Identity of one collaborative text field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub page_id: String,
    pub block_id: String,
}

impl SessionKey {
    pub fn new(page_id: impl Into<String>, block_id: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            block_id: block_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.page_id, self.block_id)
    }
}

/// A yrs document holding a single text named "content".
pub struct CrdtDocument {
    doc: Doc,
    text: TextRef,
}

impl CrdtDocument {
    /// Create a new empty CRDT document. Offsets are UTF-8 byte offsets.
    pub fn new() -> Self {
        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Bytes,
            ..Options::default()
        });
        let text = doc.get_or_insert_text("content");
        Self { doc, text }
    }

    /// Create a CRDT document with initial content.
    pub fn with_content(content: &str) -> Self {
        let mut document = Self::new();
        if !content.is_empty() {
            document.edit_range(0, 0, content);
        }
        document
    }

    /// Get the current text content.
    pub fn get_text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Encoded state vector, sent to a peer to ask for what's missing
    pub fn get_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full document state.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything this replica has that `state_vector` doesn't
    pub fn encode_delta(&self, state_vector: &[u8]) -> Result<Vec<u8>, CrdtError> {
        let sv = StateVector::decode_v1(state_vector).map_err(|e| CrdtError::DecodeError(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update from another replica.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), CrdtError> {
        let update = Update::decode_v1(update).map_err(|e| CrdtError::DecodeError(e.to_string()))?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CrdtError::ApplyError(e.to_string()))?;
        Ok(())
    }

    /// Replace bytes `start..end` with `replacement` in one transaction and
    /// return the update it produced.
    pub fn edit_range(&mut self, start: u32, end: u32, replacement: &str) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            if start < end {
                self.text.remove_range(&mut txn, start, end - start);
            }
            if !replacement.is_empty() {
                self.text.insert(&mut txn, start, replacement);
            }
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Turn the current text into `text` with the smallest single-range
    /// edit. Returns `None` when nothing changed.
    pub fn replace_text(&mut self, text: &str) -> Option<Vec<u8>> {
        let current = self.get_text();
        let (start, end, replacement) = minimal_edit(&current, text)?;
        Some(self.edit_range(start as u32, end as u32, replacement))
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Common prefix/suffix diff in UTF-8 bytes: `old[start..end]` becomes the
/// returned slice of `new`
pub fn minimal_edit<'n>(old: &str, new: &'n str) -> Option<(usize, usize, &'n str)> {
    if old == new {
        return None;
    }
    let prefix: usize = old
        .chars()
        .zip(new.chars())
        .take_while(|(a, b)| a == b)
        .map(|(c, _)| c.len_utf8())
        .sum();
    let suffix: usize = old[prefix..]
        .chars()
        .rev()
        .zip(new[prefix..].chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(c, _)| c.len_utf8())
        .sum();
    Some((prefix, old.len() - suffix, &new[prefix..new.len() - suffix]))
}

/// Update relayed through a hub room
#[derive(Clone, Debug)]
pub struct CrdtBroadcast {
    pub update: Vec<u8>,
    pub origin_client_id: String,
}

struct Room {
    document: CrdtDocument,
    sender: broadcast::Sender<CrdtBroadcast>,
    clients: HashSet<String>,
}

impl Room {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(128);
        Self {
            document: CrdtDocument::new(),
            sender,
            clients: HashSet::new(),
        }
    }
}

fn lock(room: &Mutex<Room>) -> MutexGuard<'_, Room> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relay between replicas of the same text. Keeps an authoritative copy per
/// room so late joiners start from the current state.
pub struct CollabHub {
    rooms: RwLock<HashMap<SessionKey, Arc<Mutex<Room>>>>,
}

impl CollabHub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn room(&self, key: &SessionKey) -> Arc<Mutex<Room>> {
        // Try read lock first
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = rooms.get(key) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Room::new())))
            .clone()
    }

    fn existing(&self, key: &SessionKey) -> Option<Arc<Mutex<Room>>> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(key).cloned()
    }

    /// Join a room: returns its full state and a receiver for later updates
    pub fn join(&self, key: &SessionKey, client_id: &str) -> (Vec<u8>, broadcast::Receiver<CrdtBroadcast>) {
        let room = self.room(key);
        let mut room = lock(&room);
        room.clients.insert(client_id.to_string());
        debug!(%key, client_id, clients = room.clients.len(), "joined collab room");
        (room.document.encode_state(), room.sender.subscribe())
    }

    pub fn leave(&self, key: &SessionKey, client_id: &str) {
        let Some(room) = self.existing(key) else {
            return;
        };
        let empty = {
            let mut room = lock(&room);
            room.clients.remove(client_id);
            room.clients.is_empty()
        };
        if empty {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            rooms.remove(key);
            debug!(%key, "closed collab room");
        }
    }

    /// Merge an update into the room and relay it to every subscriber,
    /// including the sender (receivers filter their own echoes)
    pub fn publish(&self, key: &SessionKey, client_id: &str, update: &[u8]) -> Result<(), CrdtError> {
        let room = self.room(key);
        let mut room = lock(&room);
        room.document.apply_update(update)?;
        // Ignore send errors (no subscribers)
        let _ = room.sender.send(CrdtBroadcast {
            update: update.to_vec(),
            origin_client_id: client_id.to_string(),
        });
        Ok(())
    }

    /// Updates a replica with `state_vector` is missing, for receivers that
    /// fell behind. `None` when the room is gone.
    pub fn resync(&self, key: &SessionKey, state_vector: &[u8]) -> Result<Option<Vec<u8>>, CrdtError> {
        self.existing(key)
            .map(|room| lock(&room).document.encode_delta(state_vector))
            .transpose()
    }

    pub fn text(&self, key: &SessionKey) -> Option<String> {
        self.existing(key).map(|room| lock(&room).document.get_text())
    }

    pub fn client_count(&self, key: &SessionKey) -> usize {
        self.existing(key).map_or(0, |room| lock(&room).clients.len())
    }
}

impl Default for CollabHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Content change that arrived from another client
#[derive(Debug, Clone, PartialEq)]
pub struct TextChange {
    pub origin: String,
    pub text: String,
}

/// Narrow interface over a shared text
pub trait CollabText: Send {
    fn connect(&mut self, key: &SessionKey) -> Result<(), CrdtError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn get_text(&self) -> String;

    /// Replace the local text and propagate the change
    fn set_text(&mut self, text: &str) -> Result<(), CrdtError>;

    /// Drain changes made by other clients since the last poll. Changes
    /// this client made itself are never reported.
    fn poll_changes(&mut self) -> Result<Vec<TextChange>, CrdtError>;
}

struct Link {
    key: SessionKey,
    receiver: broadcast::Receiver<CrdtBroadcast>,
}

/// `CollabText` over a local yrs replica connected to a `CollabHub`
pub struct YrsText {
    client_id: String,
    hub: Arc<CollabHub>,
    document: CrdtDocument,
    link: Option<Link>,
}

impl YrsText {
    pub fn new(client_id: impl Into<String>, hub: Arc<CollabHub>) -> Self {
        Self {
            client_id: client_id.into(),
            hub,
            document: CrdtDocument::new(),
            link: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl CollabText for YrsText {
    fn connect(&mut self, key: &SessionKey) -> Result<(), CrdtError> {
        self.disconnect();

        let (state, receiver) = self.hub.join(key, &self.client_id);
        self.document.apply_update(&state)?;
        // Share whatever we carried over (e.g. text typed before a re-key)
        let local = self.document.encode_state();
        self.hub.publish(key, &self.client_id, &local)?;

        self.link = Some(Link {
            key: key.clone(),
            receiver,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            self.hub.leave(&link.key, &self.client_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn get_text(&self) -> String {
        self.document.get_text()
    }

    fn set_text(&mut self, text: &str) -> Result<(), CrdtError> {
        if let Some(update) = self.document.replace_text(text) {
            if let Some(link) = &self.link {
                self.hub.publish(&link.key, &self.client_id, &update)?;
            }
        }
        Ok(())
    }

    fn poll_changes(&mut self) -> Result<Vec<TextChange>, CrdtError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(Vec::new());
        };

        let mut changes = Vec::new();
        loop {
            match link.receiver.try_recv() {
                Ok(message) => {
                    if message.origin_client_id == self.client_id {
                        continue;
                    }
                    let before = self.document.get_text();
                    self.document.apply_update(&message.update)?;
                    let text = self.document.get_text();
                    if text != before {
                        changes.push(TextChange {
                            origin: message.origin_client_id,
                            text,
                        });
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(key = %link.key, skipped, "collab receiver lagged, resyncing");
                    let state_vector = self.document.get_state_vector();
                    if let Some(delta) = self.hub.resync(&link.key, &state_vector)? {
                        let before = self.document.get_text();
                        self.document.apply_update(&delta)?;
                        let text = self.document.get_text();
                        if text != before {
                            changes.push(TextChange {
                                origin: "hub".to_string(),
                                text,
                            });
                        }
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Ok(changes)
    }
}

impl Drop for YrsText {
    fn drop(&mut self) {
        self.disconnect();
    }
}
