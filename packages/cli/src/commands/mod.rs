pub mod add;
pub mod check;
pub mod init;
pub mod property;
pub mod render;
pub mod shortcut;

pub use add::{add_block, add_page, AddBlockArgs, AddPageArgs};
pub use check::{check, CheckArgs};
pub use init::{init, InitArgs};
pub use property::{property, PropertyArgs};
pub use render::{render, RenderArgs};
pub use shortcut::{shortcut, ShortcutArgs};

use anyhow::{Context, Result};
use quire_editor::Snapshot;
use std::path::Path;

/// Read a workspace snapshot file
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid snapshot {}", path.display()))
}
