//! # Quire Editor
//!
//! Client-side editing of Quire pages: collaborative text for single blocks
//! and optimistic structural mutations against a remote store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ PageEditor: one page, its sessions, render   │
//! └──────────────────────────────────────────────┘
//!          │                        │
//!          ↓                        ↓
//! ┌──────────────────────┐  ┌──────────────────────────────┐
//! │ SessionManager       │  │ Reconciler                   │
//! │  TextSession per     │  │  page and block overlays     │
//! │  (page, block)       │  │  temp ids, rollback policy   │
//! │  debounced writes    │  │                              │
//! └──────────────────────┘  └──────────────────────────────┘
//!          │                        │
//!          ↓                        ↓
//! ┌──────────────────────┐  ┌──────────────────────────────┐
//! │ CollabHub (yrs)      │  │ RemoteStore (MemoryStore)    │
//! └──────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Store is source of truth**: what the user sees is a projection of
//!    pending operations over the last known server state
//! 2. **Every pending operation ends once**: confirmed or rolled back, late
//!    responses are ignored
//! 3. **CRDT for text only**: structure goes through the reconciler
//! 4. **Validate first**: invalid moves never touch state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use quire_editor::{BlockDraft, CollabHub, EditorConfig, MemoryStore, PageEditor, Reconciler, SessionManager};
//!
//! let store = Arc::new(MemoryStore::new());
//! let reconciler = Arc::new(Reconciler::new(store.clone(), "client-a", EditorConfig::default()));
//! let page = reconciler.create_page("Notes", None).await?;
//!
//! let sessions = SessionManager::new("client-a", Arc::new(CollabHub::new()), EditorConfig::default());
//! let mut editor = PageEditor::new(&page.id, reconciler, sessions);
//! let block = editor.add_block(BlockDraft::new(&page.id, BlockType::Text), Instant::now()).await?;
//! editor.edit_text(&block.id, "<p>Hello</p>", Instant::now())?;
//! ```

pub mod config;
pub mod crdt;
pub mod errors;
pub mod overlay;
pub mod page;
pub mod reconciler;
pub mod session;
pub mod store;

pub use config::EditorConfig;
pub use crdt::{CollabHub, CollabText, CrdtDocument, CrdtError, SessionKey, TextChange, YrsText};
pub use errors::EditorError;
pub use overlay::{OpId, Overlay, PendingOp};
pub use page::PageEditor;
pub use reconciler::{BlockDraft, PendingCreate, Reconciler, ReorderOutcome};
pub use session::{FlushReport, Lifecycle, Mode, SessionManager, SyncStatus, TextSession};
pub use store::{MemoryStore, Persisted, RemoteStore, Snapshot, StoreError, StoreEvent, StoreOp};
