//! # Markdown Shortcuts
//!
//! Live-typing transforms computed on the structured document plus a cursor
//! position:
//!
//! - `# `, `## `, `### ` at the start of a paragraph promote it to a heading
//! - `**text**` becomes bold, `*text*` becomes italic
//!
//! A transform only fires once the cursor has moved past the closing
//! delimiter, so half-typed spans are left alone. Unbalanced input simply
//! doesn't match.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{Document, Mark, Marks, Node, Run};

/// Cursor inside a document: node index plus char offset into the node's
/// plain text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub node: usize,
    pub offset: usize,
}

impl Cursor {
    pub fn new(node: usize, offset: usize) -> Self {
        Self { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Heading(u8),
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutOutcome {
    pub document: Document,
    pub cursor: Cursor,
    pub applied: Vec<Shortcut>,
}

fn bold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").expect("static pattern"))
}

fn italic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\*([^*]+)\*").expect("static pattern"))
}

/// Apply every shortcut that is complete before the cursor. Returns `None`
/// when nothing fired.
pub fn apply_markdown_shortcut(document: &Document, cursor: Cursor) -> Option<ShortcutOutcome> {
    let (heading_level, runs) = match document.nodes.get(cursor.node)? {
        Node::Paragraph { runs } => (None, runs),
        Node::Heading { level, runs } => (Some(*level), runs),
        Node::BulletedList { .. } | Node::OrderedList { .. } => return None,
    };

    let mut chars = flatten(runs);
    let mut offset = cursor.offset.min(chars.len());
    let mut level = heading_level;
    let mut applied = Vec::new();

    if level.is_none() {
        if let Some(hashes) = heading_marker(&chars) {
            let marker_len = hashes + 1;
            if offset >= marker_len {
                chars.drain(..marker_len);
                offset -= marker_len;
                level = Some(hashes as u8);
                applied.push(Shortcut::Heading(hashes as u8));
            }
        }
    }

    while let Some((start, end)) = find_span(&chars, bold_pattern(), 2, offset) {
        wrap_span(&mut chars, start, end, 2, Mark::Bold);
        offset -= 4;
        applied.push(Shortcut::Bold);
    }

    while let Some((start, end)) = find_span(&chars, italic_pattern(), 1, offset) {
        wrap_span(&mut chars, start, end, 1, Mark::Italic);
        offset -= 2;
        applied.push(Shortcut::Italic);
    }

    if applied.is_empty() {
        return None;
    }

    let runs = regroup(&chars);
    let mut document = document.clone();
    document.nodes[cursor.node] = match level {
        Some(level) => Node::heading(level, runs),
        None => Node::paragraph(runs),
    };

    Some(ShortcutOutcome {
        document,
        cursor: Cursor::new(cursor.node, offset),
        applied,
    })
}

fn flatten(runs: &[Run]) -> Vec<(char, Marks)> {
    runs.iter()
        .flat_map(|run| run.text.chars().map(move |c| (c, run.marks)))
        .collect()
}

fn regroup(chars: &[(char, Marks)]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (ch, marks) in chars {
        match runs.last_mut() {
            Some(run) if run.marks == *marks => run.text.push(*ch),
            _ => runs.push(Run::new(ch.to_string(), *marks)),
        }
    }
    runs
}

/// Number of leading `#` when followed by a space, limited to 1..=3
fn heading_marker(chars: &[(char, Marks)]) -> Option<usize> {
    let hashes = chars.iter().take_while(|(c, _)| *c == '#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    match chars.get(hashes) {
        Some((' ', _)) => Some(hashes),
        _ => None,
    }
}

/// First delimited span (char indices, delimiters included) that closes at
/// or before `limit`
fn find_span(
    chars: &[(char, Marks)],
    pattern: &Regex,
    delimiter: usize,
    limit: usize,
) -> Option<(usize, usize)> {
    let text: String = chars.iter().map(|(c, _)| *c).collect();
    let mut from = 0;

    while let Some(found) = pattern.find_at(&text, from) {
        let start = text[..found.start()].chars().count();
        let end = start + text[found.start()..found.end()].chars().count();
        from = found.start() + 1;

        if end > limit {
            return None;
        }

        // Emulated lookaround: the span must not touch another '*'
        let before = start.checked_sub(1).map(|i| chars[i].0);
        let after = chars.get(end).map(|(c, _)| *c);
        if before == Some('*') || after == Some('*') {
            continue;
        }

        let inner_first = chars[start + delimiter].0;
        let inner_last = chars[end - delimiter - 1].0;
        if inner_first.is_whitespace() || inner_last.is_whitespace() {
            continue;
        }

        return Some((start, end));
    }
    None
}

fn wrap_span(chars: &mut Vec<(char, Marks)>, start: usize, end: usize, delimiter: usize, mark: Mark) {
    for entry in &mut chars[start + delimiter..end - delimiter] {
        entry.1 = entry.1.with(mark);
    }
    chars.drain(end - delimiter..end);
    chars.drain(start..start + delimiter);
}
