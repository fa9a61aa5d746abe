use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use quire_document::{apply_markdown_shortcut, parse, render, Cursor, ShortcutOutcome};

#[derive(Debug, Args)]
pub struct ShortcutArgs {
    /// Block HTML as typed
    pub html: String,

    /// Node (paragraph, heading or list) holding the cursor
    #[arg(long, default_value = "0")]
    pub node: usize,

    /// Cursor offset in characters; defaults to the end of the node
    #[arg(long)]
    pub offset: Option<usize>,
}

/// Run shortcuts on `html` with the cursor at (`node`, `offset`)
pub fn run_shortcut(html: &str, node: usize, offset: Option<usize>) -> Result<Option<ShortcutOutcome>> {
    let document = parse(html);
    let target = document
        .nodes
        .get(node)
        .ok_or_else(|| anyhow!("No node {} in a document of {}", node, document.nodes.len()))?;
    let offset = offset.unwrap_or_else(|| target.plain_text().chars().count());
    Ok(apply_markdown_shortcut(&document, Cursor::new(node, offset)))
}

pub fn shortcut(args: ShortcutArgs, _cwd: &str) -> Result<()> {
    match run_shortcut(&args.html, args.node, args.offset)? {
        Some(outcome) => {
            let applied: Vec<String> = outcome.applied.iter().map(|s| format!("{:?}", s)).collect();
            eprintln!("{} {}", "✓".green(), applied.join(", "));
            eprintln!("  cursor → node {}, offset {}", outcome.cursor.node, outcome.cursor.offset);
            println!("{}", render(&outcome.document));
        }
        None => {
            eprintln!("{} No shortcut applies", "•".yellow());
            println!("{}", render(&parse(&args.html)));
        }
    }
    Ok(())
}
