mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{
    add_block, add_page, check, init, property, render, shortcut, AddBlockArgs, AddPageArgs, CheckArgs,
    InitArgs, PropertyArgs, RenderArgs, ShortcutArgs,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Quire CLI - inspect and edit block workspaces
#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log editor activity (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a config file and a sample workspace snapshot
    Init(InitArgs),

    /// Render a page of a snapshot to HTML
    Render(RenderArgs),

    /// Validate page and block trees of one or more snapshots
    Check(CheckArgs),

    /// Apply markdown shortcuts to a piece of block HTML
    Shortcut(ShortcutArgs),

    /// Parse and format a page property value
    Property(PropertyArgs),

    /// Add a page to a snapshot
    AddPage(AddPageArgs),

    /// Add a block to a page of a snapshot
    AddBlock(AddBlockArgs),
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir.display().to_string(),
        Err(err) => {
            eprintln!("{} Cannot get current directory: {}", "Error:".red().bold(), err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Init(args) => init(args, &cwd),
        Command::Render(args) => render(args, &cwd),
        Command::Check(args) => check(args, &cwd),
        Command::Shortcut(args) => shortcut(args, &cwd),
        Command::Property(args) => property(args, &cwd),
        Command::AddPage(args) => add_page(args, &cwd),
        Command::AddBlock(args) => add_block(args, &cwd),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
