use crate::config::{Config, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use quire_blocks::{Block, BlockType, Page};
use quire_editor::Snapshot;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Snapshot file to create
    #[arg(short, long, default_value = "quire.snapshot.json")]
    pub snapshot: String,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

/// A small workspace showing the main block types
pub fn sample_snapshot() -> Snapshot {
    let page = Page::new("page-1", "Getting started");
    Snapshot {
        pages: vec![page],
        blocks: vec![
            Block::new("block-2", "page-1", BlockType::Heading1, "page-1", 0).with_text("Welcome"),
            Block::new("block-3", "page-1", BlockType::Text, "page-1", 1)
                .with_text("<p>Type <strong>## </strong> at the start of a line for a heading.</p>"),
            Block::new("block-4", "page-1", BlockType::ToggleList, "page-1", 2).with_text("More"),
            Block::new("block-5", "page-1", BlockType::Callout, "block-4", 0)
                .with_content(json!({ "text": "<p>Nested inside the toggle</p>", "icon": "📌" })),
            Block::new("block-6", "page-1", BlockType::Divider, "page-1", 3),
        ],
    }
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    // Check if config already exists
    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing Quire workspace...".bright_blue().bold());

    let snapshot_path = PathBuf::from(cwd).join(&args.snapshot);
    if !snapshot_path.exists() {
        fs::write(&snapshot_path, serde_json::to_string_pretty(&sample_snapshot())?)?;
        println!("  {} Created {}", "✓".green(), args.snapshot);
    }

    let config = Config {
        snapshot: args.snapshot.clone(),
        ..Config::default()
    };
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("{}", "✅ Workspace initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Run: quire render page-1");
    println!("  2. Run: quire check");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_blocks::tree::orphans;

    #[test]
    fn test_sample_snapshot_is_well_formed() {
        let snapshot = sample_snapshot();
        assert!(orphans(&snapshot.blocks, "page-1").is_empty());
    }

    #[test]
    fn test_init_writes_config_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();

        init(
            InitArgs {
                snapshot: "ws.json".into(),
                force: false,
            },
            &cwd,
        )
        .unwrap();

        let config = Config::load(&cwd).unwrap();
        assert_eq!(config.snapshot, "ws.json");
        let snapshot = crate::commands::read_snapshot(&dir.path().join("ws.json")).unwrap();
        assert_eq!(snapshot, sample_snapshot());
    }
}
