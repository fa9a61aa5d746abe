use crate::commands::read_snapshot;
use crate::config::Config;
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quire_blocks::render_page;
use quire_document::{parse, TextStats, Visitor};
use quire_editor::Snapshot;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Page to render
    pub page: String,

    /// Snapshot file (overrides config)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Render without editing affordances
    #[arg(long)]
    pub read_only: bool,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Print word and character counts of the page's text to stderr
    #[arg(long)]
    pub stats: bool,
}

/// HTML for one page of a snapshot
pub fn render_snapshot_page(snapshot: &Snapshot, page_id: &str, config: &Config, editable: bool) -> Result<String> {
    if !snapshot.pages.iter().any(|page| page.id == page_id) {
        return Err(anyhow!("Page not found: {}", page_id));
    }
    Ok(render_page(
        &snapshot.blocks,
        page_id,
        &config.render_options(editable),
    ))
}

/// Text counts summed over the page's text-bearing blocks, and how many
/// blocks contributed
pub fn page_stats(snapshot: &Snapshot, page_id: &str) -> (usize, TextStats) {
    let mut stats = TextStats::default();
    let mut counted = 0;
    for block in snapshot
        .blocks
        .iter()
        .filter(|block| block.page_id == page_id && block.block_type.is_text_bearing())
    {
        stats.visit_document(&parse(block.text_html()));
        counted += 1;
    }
    (counted, stats)
}

pub fn render(args: RenderArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let snapshot = read_snapshot(&config.snapshot_path(cwd, args.snapshot.as_deref()))?;

    let html = render_snapshot_page(&snapshot, &args.page, &config, !args.read_only)?;

    match args.out {
        Some(out) => {
            let out = PathBuf::from(cwd).join(out);
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&out, html)?;
            eprintln!("{} Rendered {} → {}", "✓".green(), args.page, out.display());
        }
        None => println!("{}", html),
    }

    if args.stats {
        let (blocks, stats) = page_stats(&snapshot, &args.page);
        eprintln!(
            "{} {} text blocks, {} words, {} characters, {} formatted runs",
            "ℹ".blue(),
            blocks,
            stats.words,
            stats.chars,
            stats.formatted_runs
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::sample_snapshot;

    #[test]
    fn test_render_sample_page() {
        let html = render_snapshot_page(&sample_snapshot(), "page-1", &Config::default(), false).unwrap();
        assert!(html.starts_with("<article class=\"page\" data-page-id=\"page-1\">"));
        assert!(html.contains("Nested inside the toggle"));
        assert!(!html.contains("contenteditable"));
    }

    #[test]
    fn test_page_stats_count_text_blocks_only() {
        let (blocks, stats) = page_stats(&sample_snapshot(), "page-1");
        assert_eq!(blocks, 3);
        assert_eq!(stats.words, 16);
        assert_eq!(stats.formatted_runs, 1);

        let (none, empty) = page_stats(&sample_snapshot(), "page-9");
        assert_eq!(none, 0);
        assert_eq!(empty, TextStats::default());
    }

    #[test]
    fn test_unknown_page() {
        let err = render_snapshot_page(&sample_snapshot(), "page-9", &Config::default(), true).unwrap_err();
        assert_eq!(err.to_string(), "Page not found: page-9");
    }
}
