//! # Quire Document
//!
//! Rich text model for a single text-bearing block.
//!
//! ```text
//! editor surface HTML ──parse──▶ Document ──render──▶ HTML
//!                                   │
//!                                   └─ apply_markdown_shortcut(doc, cursor)
//! ```
//!
//! The supported set is deliberately small: paragraphs, headings, bulleted
//! and ordered lists, and the bold / italic / underline / strike marks.
//! Anything else in the input collapses to plain text. For documents built
//! from the supported set, `parse(&render(&doc)) == doc.normalized()`.

pub mod entities;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod serializer;
pub mod shortcuts;
pub mod visitor;

pub use model::{normalize_runs, Document, ListItem, Mark, Marks, Node, Run};
pub use parser::parse;
pub use serializer::{render, render_inline, Serializer};
pub use shortcuts::{apply_markdown_shortcut, Cursor, Shortcut, ShortcutOutcome};
pub use visitor::{PlainTextCollector, TextStats, Visitor};
