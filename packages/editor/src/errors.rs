//! Error types for the editor

use quire_blocks::{PropertyError, ValidationError};
use thiserror::Error;

use crate::crdt::CrdtError;
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("CRDT error: {0}")]
    Crdt(#[from] CrdtError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No text session open for block {0}")]
    SessionNotFound(String),

    #[error("Create of {0} was cancelled before it was saved")]
    Cancelled(String),
}

impl EditorError {
    /// Validation failures are rejected before any state changes
    pub fn is_validation(&self) -> bool {
        matches!(self, EditorError::Validation(_) | EditorError::Property(_))
    }
}
