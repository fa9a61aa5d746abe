//! # Quire Blocks
//!
//! Page content as a flat list of typed blocks linked by `parent_id`.
//!
//! ```text
//! Vec<Block> ──partition──▶ roots + children ──BlockRenderer──▶ HTML
//!                 │
//!                 └─ reorder / validate_block_parent before mutating
//! ```

pub mod ids;
pub mod model;
pub mod properties;
pub mod render;
pub mod tree;
pub mod validate;

pub use ids::{is_temporary_id, TempIdGenerator};
pub use model::{Block, BlockPatch, BlockType, Column, Entity, Page, PagePatch, Positioned};
pub use properties::{
    PropertyConfig, PropertyError, PropertyKind, PropertyRegistry, PropertySchema, PropertyType,
    PropertyValue,
};
pub use render::{render_page, BlockRenderer, RenderError, RenderOptions};
pub use tree::{partition, reorder, Partition, PositionUpdate};
pub use validate::{validate_block_parent, validate_page_parent, NestingRules, ValidationError};
