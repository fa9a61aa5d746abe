use crate::commands::read_snapshot;
use crate::config::Config;
use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quire_blocks::tree::orphans;
use quire_blocks::{render_page, validate_block_parent, validate_page_parent, NestingRules, RenderOptions};
use quire_editor::Snapshot;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Snapshot file or directory of snapshots (defaults to the configured one)
    pub input: Option<PathBuf>,

    /// List every checked page, not just problems
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// Page parent is missing, cyclic or too deep
    Page { page: String, reason: String },
    /// Block parent is invalid for its page
    Block { block: String, reason: String },
    /// Block can't be reached from its page root
    Orphan { block: String, page: String },
    /// Block references a page that doesn't exist
    UnknownPage { block: String, page: String },
    /// Block fails to render
    Render { page: String, count: usize },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Page { page, reason } => write!(f, "page {}: {}", page, reason),
            Problem::Block { block, reason } => write!(f, "block {}: {}", block, reason),
            Problem::Orphan { block, page } => write!(f, "block {} is not reachable from page {}", block, page),
            Problem::UnknownPage { block, page } => write!(f, "block {} belongs to unknown page {}", block, page),
            Problem::Render { page, count } => write!(f, "page {}: {} block(s) failed to render", page, count),
        }
    }
}

/// Structural problems in a snapshot
pub fn check_snapshot(snapshot: &Snapshot, rules: &NestingRules) -> Vec<Problem> {
    let mut problems = Vec::new();
    let page_ids: HashSet<&str> = snapshot.pages.iter().map(|p| p.id.as_str()).collect();

    for page in &snapshot.pages {
        if let Err(err) = validate_page_parent(&snapshot.pages, &page.id, page.parent_id.as_deref(), rules) {
            problems.push(Problem::Page {
                page: page.id.clone(),
                reason: err.to_string(),
            });
        }
    }

    for block in &snapshot.blocks {
        if !page_ids.contains(block.page_id.as_str()) {
            problems.push(Problem::UnknownPage {
                block: block.id.clone(),
                page: block.page_id.clone(),
            });
        }
    }

    for page in &snapshot.pages {
        let blocks: Vec<_> = snapshot
            .blocks
            .iter()
            .filter(|b| b.page_id == page.id)
            .cloned()
            .collect();

        let orphaned: HashSet<&str> = orphans(&blocks, &page.id).iter().map(|b| b.id.as_str()).collect();
        for block in &blocks {
            if orphaned.contains(block.id.as_str()) {
                problems.push(Problem::Orphan {
                    block: block.id.clone(),
                    page: page.id.clone(),
                });
            } else if let Err(err) = validate_block_parent(&blocks, &page.id, Some(&block.id), &block.parent_id, rules) {
                problems.push(Problem::Block {
                    block: block.id.clone(),
                    reason: err.to_string(),
                });
            }
        }

        let html = render_page(&blocks, &page.id, &RenderOptions::read_only());
        let failed = html.matches("class=\"block block-error\"").count();
        if failed > 0 {
            problems.push(Problem::Render {
                page: page.id.clone(),
                count: failed,
            });
        }
    }
    problems
}

pub fn check(args: CheckArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let rules = config.editor.nesting_rules();
    let input = config.snapshot_path(cwd, args.input.as_deref());

    println!("🔍 {} Quire snapshot check", "Starting".green().bold());
    println!("   Input: {}", input.display());
    println!();

    let files = if input.is_dir() {
        find_snapshots(&input)
    } else if input.is_file() {
        vec![input.clone()]
    } else {
        return Err(anyhow!("Input path does not exist: {}", input.display()));
    };

    let mut total = 0;
    for file in &files {
        let snapshot = read_snapshot(file)?;
        let problems = check_snapshot(&snapshot, &rules);
        debug!(file = %file.display(), problems = problems.len(), "checked snapshot");
        total += problems.len();

        if problems.is_empty() {
            if args.verbose {
                println!("{} {} ({} pages)", "✓".green(), file.display(), snapshot.pages.len());
            }
            continue;
        }
        println!("{} {}", "✗".red(), file.display());
        for problem in &problems {
            println!("   {} {}", "error:".red(), problem);
        }
    }

    println!();
    println!("   Files checked: {}", files.len());
    if total > 0 {
        return Err(anyhow!("{} problem(s) found", total));
    }
    println!("   {} No issues found!", "✓".green());
    Ok(())
}

fn find_snapshots(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .filter(|e| e.file_name() != crate::config::DEFAULT_CONFIG_NAME)
        .map(|e| e.path().to_path_buf())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::sample_snapshot;
    use quire_blocks::{Block, BlockType, Page};
    use serde_json::json;

    #[test]
    fn test_sample_is_clean() {
        assert!(check_snapshot(&sample_snapshot(), &NestingRules::default()).is_empty());
    }

    #[test]
    fn test_reports_orphans_and_bad_parents() {
        let mut snapshot = sample_snapshot();
        snapshot.blocks.push(Block::new("lost", "page-1", BlockType::Text, "gone", 0));
        snapshot.blocks.push(Block::new("bad", "page-1", BlockType::Text, "block-3", 0));

        let problems = check_snapshot(&snapshot, &NestingRules::default());

        assert!(problems.contains(&Problem::Orphan {
            block: "lost".into(),
            page: "page-1".into()
        }));
        assert!(problems
            .iter()
            .any(|p| matches!(p, Problem::Block { block, .. } if block == "bad")));
    }

    #[test]
    fn test_reports_page_cycles_and_render_faults() {
        let mut snapshot = sample_snapshot();
        snapshot.pages.push(Page::new("a", "A").with_parent("b"));
        snapshot.pages.push(Page::new("b", "B").with_parent("a"));
        snapshot.blocks.push(
            Block::new("t", "page-1", BlockType::Table, "page-1", 9).with_content(json!({ "table": "nope" })),
        );

        let problems = check_snapshot(&snapshot, &NestingRules::default());

        assert_eq!(
            problems
                .iter()
                .filter(|p| matches!(p, Problem::Page { .. }))
                .count(),
            2
        );
        assert!(problems.contains(&Problem::Render {
            page: "page-1".into(),
            count: 1
        }));
    }
}
