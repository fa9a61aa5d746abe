//! # Document → HTML
//!
//! Inverse of [`crate::parse`]. Output is compact (no indentation) so that
//! whitespace inside runs survives a round trip.

use crate::entities;
use crate::model::{Document, ListItem, Node, Run};

/// Markup used for a paragraph, heading or list item with no content, so
/// the editing surface keeps a visible blank line
const EMPTY_LINE: &str = "<br>";

/// Serialize a document to HTML
pub fn render(document: &Document) -> String {
    let mut serializer = Serializer::new();
    serializer.write_document(document);
    serializer.finish()
}

/// Serialize inline runs without a block wrapper
pub fn render_inline(runs: &[Run]) -> String {
    let mut serializer = Serializer::new();
    serializer.write_runs(runs);
    serializer.finish()
}

pub struct Serializer {
    buffer: String,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    pub fn write_document(&mut self, document: &Document) {
        for node in &document.nodes {
            self.write_node(node);
        }
    }

    pub fn write_node(&mut self, node: &Node) {
        match node {
            Node::Paragraph { runs } => self.write_block("p", runs),
            Node::Heading { level, runs } => {
                let tag = format!("h{}", (*level).clamp(1, 6));
                self.write_block(&tag, runs);
            }
            Node::BulletedList { items } => self.write_list("ul", items),
            Node::OrderedList { items } => self.write_list("ol", items),
        }
    }

    fn write_block(&mut self, tag: &str, runs: &[Run]) {
        self.open(tag);
        if runs.iter().all(Run::is_empty) {
            self.buffer.push_str(EMPTY_LINE);
        } else {
            self.write_runs(runs);
        }
        self.close(tag);
    }

    fn write_list(&mut self, tag: &str, items: &[ListItem]) {
        self.open(tag);
        for item in items {
            self.write_block("li", &item.runs);
        }
        self.close(tag);
    }

    pub fn write_runs(&mut self, runs: &[Run]) {
        for run in runs.iter().filter(|r| !r.is_empty()) {
            self.write_run(run);
        }
    }

    fn write_run(&mut self, run: &Run) {
        let marks: Vec<_> = run.marks.iter().collect();
        for mark in &marks {
            self.open(mark.tag());
        }

        let mut lines = run.text.split('\n').peekable();
        while let Some(line) = lines.next() {
            entities::escape(line, &mut self.buffer);
            if lines.peek().is_some() {
                self.buffer.push_str("<br>");
            }
        }

        for mark in marks.iter().rev() {
            self.close(mark.tag());
        }
    }

    fn open(&mut self, tag: &str) {
        self.buffer.push('<');
        self.buffer.push_str(tag);
        self.buffer.push('>');
    }

    fn close(&mut self, tag: &str) {
        self.buffer.push_str("</");
        self.buffer.push_str(tag);
        self.buffer.push('>');
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}
