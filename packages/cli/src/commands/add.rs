use crate::config::Config;
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quire_blocks::{Block, BlockType, Page};
use quire_editor::{BlockDraft, MemoryStore, Reconciler};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct AddPageArgs {
    /// Page title
    pub title: String,

    /// Parent page (top level when omitted)
    #[arg(long)]
    pub parent: Option<String>,

    /// Snapshot file (overrides config)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AddBlockArgs {
    /// Page to add to
    pub page: String,

    /// Block type, e.g. text, heading_2, toggle_list, divider
    #[arg(short = 't', long = "type", default_value = "text")]
    pub block_type: String,

    /// Rich text for text-bearing blocks
    #[arg(long)]
    pub text: Option<String>,

    /// Container block to nest under
    #[arg(long)]
    pub parent: Option<String>,

    /// Snapshot file (overrides config)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

/// Snapshot loaded into an in-memory store, edited through a reconciler
struct Workspace {
    path: PathBuf,
    store: Arc<MemoryStore>,
    reconciler: Reconciler,
    runtime: tokio::runtime::Runtime,
}

impl Workspace {
    fn open(config: &Config, path: PathBuf) -> Result<Self> {
        let store = Arc::new(MemoryStore::load(&path)?);
        let reconciler = Reconciler::new(store.clone(), "cli", config.editor.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(reconciler.load_pages())?;
        Ok(Self {
            path,
            store,
            reconciler,
            runtime,
        })
    }

    fn save(&self) -> Result<()> {
        Ok(self.store.save(&self.path)?)
    }
}

pub async fn create_page(reconciler: &Reconciler, title: &str, parent: Option<&str>) -> Result<Page> {
    Ok(reconciler.create_page(title, parent).await?)
}

pub async fn create_block(reconciler: &Reconciler, args: &AddBlockArgs) -> Result<Block> {
    if reconciler.page(&args.page).is_none() {
        return Err(anyhow!("Page not found: {}", args.page));
    }
    reconciler.refresh(&args.page).await?;

    let block_type = BlockType::from_name(&args.block_type);
    if let BlockType::Unknown(name) = &block_type {
        return Err(anyhow!("Unknown block type: {}", name));
    }
    let mut draft = BlockDraft::new(&args.page, block_type);
    if let Some(text) = &args.text {
        draft = draft.with_text(text);
    }
    if let Some(parent) = &args.parent {
        draft = draft.under(parent);
    }
    Ok(reconciler.create_block(draft).await?)
}

pub fn add_page(args: AddPageArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let workspace = Workspace::open(&config, config.snapshot_path(cwd, args.snapshot.as_deref()))?;

    let page = workspace.runtime.block_on(create_page(
        &workspace.reconciler,
        &args.title,
        args.parent.as_deref(),
    ))?;
    workspace.save()?;

    println!("{} Created page {} ({})", "✓".green(), page.title.bright_white(), page.id);
    Ok(())
}

pub fn add_block(args: AddBlockArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let workspace = Workspace::open(&config, config.snapshot_path(cwd, args.snapshot.as_deref()))?;

    let block = workspace
        .runtime
        .block_on(create_block(&workspace.reconciler, &args))?;
    workspace.save()?;

    println!("{} Added {} block {} to {}", "✓".green(), block.block_type, block.id, block.page_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::sample_snapshot;
    use crate::commands::read_snapshot;

    fn workspace() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.snapshot.json");
        std::fs::write(&path, serde_json::to_string(&sample_snapshot()).unwrap()).unwrap();
        let cwd = dir.path().display().to_string();
        (dir, cwd)
    }

    fn block_args(page: &str, block_type: &str) -> AddBlockArgs {
        AddBlockArgs {
            page: page.to_string(),
            block_type: block_type.to_string(),
            text: Some("<p>added</p>".to_string()),
            parent: None,
            snapshot: None,
        }
    }

    #[test]
    fn test_add_block_persists_to_snapshot() {
        let (dir, cwd) = workspace();

        add_block(block_args("page-1", "quote"), &cwd).unwrap();

        let snapshot = read_snapshot(&dir.path().join("quire.snapshot.json")).unwrap();
        let added = snapshot.blocks.last().unwrap();
        assert_eq!(added.block_type, BlockType::Quote);
        assert_eq!(added.text_html(), "<p>added</p>");
        assert_eq!(added.pos, 4);
        assert_ne!(added.id, "block-6");
    }

    #[test]
    fn test_add_block_rejects_unknown_type_and_page() {
        let (_dir, cwd) = workspace();
        assert!(add_block(block_args("page-1", "kanban"), &cwd).is_err());
        assert!(add_block(block_args("page-9", "text"), &cwd).is_err());
    }

    #[test]
    fn test_add_sub_page() {
        let (dir, cwd) = workspace();

        add_page(
            AddPageArgs {
                title: "Child".into(),
                parent: Some("page-1".into()),
                snapshot: None,
            },
            &cwd,
        )
        .unwrap();

        let snapshot = read_snapshot(&dir.path().join("quire.snapshot.json")).unwrap();
        assert_eq!(snapshot.pages.len(), 2);
        assert_eq!(snapshot.pages[1].parent_id.as_deref(), Some("page-1"));
    }
}
