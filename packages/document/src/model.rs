//! # Rich Document Model
//!
//! Structured content of one text-bearing block: an ordered list of
//! block-level nodes, each holding inline runs of marked text.

use serde::{Deserialize, Serialize};

/// Inline formatting mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
    Bold,
    Italic,
    Underline,
    Strike,
}

impl Mark {
    /// Marks in their canonical nesting order (outermost first)
    pub const ALL: [Mark; 4] = [Mark::Bold, Mark::Italic, Mark::Underline, Mark::Strike];

    /// HTML tag used when rendering this mark
    pub fn tag(self) -> &'static str {
        match self {
            Mark::Bold => "strong",
            Mark::Italic => "em",
            Mark::Underline => "u",
            Mark::Strike => "s",
        }
    }

    /// Map an inline HTML tag to the mark it carries
    pub fn from_tag(tag: &str) -> Option<Mark> {
        match tag {
            "strong" | "b" => Some(Mark::Bold),
            "em" | "i" => Some(Mark::Italic),
            "u" => Some(Mark::Underline),
            "s" | "strike" | "del" => Some(Mark::Strike),
            _ => None,
        }
    }
}

/// Set of marks applied to a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marks {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Marks {
    pub const NONE: Marks = Marks {
        bold: false,
        italic: false,
        underline: false,
        strike: false,
    };

    /// Return a copy with `mark` added
    pub fn with(mut self, mark: Mark) -> Self {
        match mark {
            Mark::Bold => self.bold = true,
            Mark::Italic => self.italic = true,
            Mark::Underline => self.underline = true,
            Mark::Strike => self.strike = true,
        }
        self
    }

    pub fn contains(self, mark: Mark) -> bool {
        match mark {
            Mark::Bold => self.bold,
            Mark::Italic => self.italic,
            Mark::Underline => self.underline,
            Mark::Strike => self.strike,
        }
    }

    pub fn is_empty(self) -> bool {
        self == Marks::NONE
    }

    /// Marks present, in canonical nesting order
    pub fn iter(self) -> impl Iterator<Item = Mark> {
        Mark::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Mark> for Marks {
    fn from_iter<I: IntoIterator<Item = Mark>>(iter: I) -> Self {
        iter.into_iter().fold(Marks::NONE, Marks::with)
    }
}

/// A run of text sharing one set of marks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    #[serde(default)]
    pub marks: Marks,
}

impl Run {
    pub fn new(text: impl Into<String>, marks: Marks) -> Self {
        Self {
            text: text.into(),
            marks,
        }
    }

    /// Unformatted run
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Marks::NONE)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// One entry of a bulleted or ordered list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub runs: Vec<Run>,
}

impl ListItem {
    pub fn new(runs: Vec<Run>) -> Self {
        Self { runs }
    }

    pub fn plain_text(&self) -> String {
        runs_text(&self.runs)
    }
}

/// Block-level node of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Paragraph { runs: Vec<Run> },
    Heading { level: u8, runs: Vec<Run> },
    BulletedList { items: Vec<ListItem> },
    OrderedList { items: Vec<ListItem> },
}

impl Node {
    pub fn paragraph(runs: Vec<Run>) -> Self {
        Node::Paragraph { runs }
    }

    pub fn empty_paragraph() -> Self {
        Node::Paragraph { runs: Vec::new() }
    }

    /// Heading with its level clamped to 1..=6
    pub fn heading(level: u8, runs: Vec<Run>) -> Self {
        Node::Heading {
            level: level.clamp(1, 6),
            runs,
        }
    }

    /// Inline runs of a paragraph or heading
    pub fn runs(&self) -> Option<&[Run]> {
        match self {
            Node::Paragraph { runs } | Node::Heading { runs, .. } => Some(runs),
            Node::BulletedList { .. } | Node::OrderedList { .. } => None,
        }
    }

    pub fn items(&self) -> Option<&[ListItem]> {
        match self {
            Node::BulletedList { items } | Node::OrderedList { items } => Some(items),
            Node::Paragraph { .. } | Node::Heading { .. } => None,
        }
    }

    pub fn plain_text(&self) -> String {
        match self {
            Node::Paragraph { runs } | Node::Heading { runs, .. } => runs_text(runs),
            Node::BulletedList { items } | Node::OrderedList { items } => items
                .iter()
                .map(ListItem::plain_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn normalized(&self) -> Node {
        match self {
            Node::Paragraph { runs } => Node::Paragraph {
                runs: normalize_runs(runs.clone()),
            },
            Node::Heading { level, runs } => Node::heading(*level, normalize_runs(runs.clone())),
            Node::BulletedList { items } => Node::BulletedList {
                items: normalize_items(items),
            },
            Node::OrderedList { items } => Node::OrderedList {
                items: normalize_items(items),
            },
        }
    }
}

/// Rich text document for one block.
///
/// A document always holds at least one node; constructors substitute a
/// single empty paragraph for an empty node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    /// Document holding one empty paragraph
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::empty_paragraph()],
        }
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        if nodes.is_empty() {
            Self::new()
        } else {
            Self { nodes }
        }
    }

    /// Single paragraph of unformatted text
    pub fn from_plain_text(text: &str) -> Self {
        let runs = if text.is_empty() {
            Vec::new()
        } else {
            vec![Run::plain(text)]
        };
        Self::from_nodes(vec![Node::paragraph(runs)])
    }

    /// True when no node carries any text
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|node| match node {
            Node::Paragraph { runs } | Node::Heading { runs, .. } => runs.iter().all(Run::is_empty),
            Node::BulletedList { items } | Node::OrderedList { items } => items
                .iter()
                .all(|item| item.runs.iter().all(Run::is_empty)),
        })
    }

    /// Canonical form: adjacent runs with equal marks merged, empty runs
    /// dropped, content consisting of a lone line break treated as empty.
    pub fn normalized(&self) -> Document {
        Document::from_nodes(self.nodes.iter().map(Node::normalized).collect())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn runs_text(runs: &[Run]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

fn normalize_items(items: &[ListItem]) -> Vec<ListItem> {
    items
        .iter()
        .map(|item| ListItem::new(normalize_runs(item.runs.clone())))
        .collect()
}

/// Merge adjacent runs with identical marks and drop empty ones
pub fn normalize_runs(runs: Vec<Run>) -> Vec<Run> {
    let mut merged: Vec<Run> = Vec::with_capacity(runs.len());
    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.marks == run.marks => last.text.push_str(&run.text),
            _ => merged.push(run),
        }
    }

    if runs_text(&merged) == "\n" {
        merged.clear();
    }
    merged
}
