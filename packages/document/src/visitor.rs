use crate::model::{Document, ListItem, Node, Run};

/// Visitor pattern for traversing documents immutably
///
/// Default implementations walk the entire tree. Override specific
/// visit_* methods to act on the nodes you care about.
pub trait Visitor: Sized {
    fn visit_document(&mut self, doc: &Document) {
        walk_document(self, doc);
    }

    fn visit_node(&mut self, node: &Node) {
        walk_node(self, node);
    }

    fn visit_list_item(&mut self, item: &ListItem) {
        walk_list_item(self, item);
    }

    fn visit_run(&mut self, _run: &Run) {
        // Leaf node, no children to walk
    }
}

pub fn walk_document<V: Visitor>(visitor: &mut V, doc: &Document) {
    for node in &doc.nodes {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: Visitor>(visitor: &mut V, node: &Node) {
    match node {
        Node::Paragraph { runs } | Node::Heading { runs, .. } => {
            for run in runs {
                visitor.visit_run(run);
            }
        }
        Node::BulletedList { items } | Node::OrderedList { items } => {
            for item in items {
                visitor.visit_list_item(item);
            }
        }
    }
}

pub fn walk_list_item<V: Visitor>(visitor: &mut V, item: &ListItem) {
    for run in &item.runs {
        visitor.visit_run(run);
    }
}

/// Collects plain text, one line per paragraph, heading or list item
#[derive(Default)]
pub struct PlainTextCollector {
    lines: Vec<String>,
}

impl PlainTextCollector {
    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}

impl Visitor for PlainTextCollector {
    fn visit_node(&mut self, node: &Node) {
        if node.runs().is_some() {
            self.lines.push(String::new());
        }
        walk_node(self, node);
    }

    fn visit_list_item(&mut self, item: &ListItem) {
        self.lines.push(String::new());
        walk_list_item(self, item);
    }

    fn visit_run(&mut self, run: &Run) {
        if let Some(line) = self.lines.last_mut() {
            line.push_str(&run.text);
        }
    }
}

/// Word, character and formatting counts for a document
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub chars: usize,
    pub words: usize,
    pub formatted_runs: usize,
}

impl Visitor for TextStats {
    fn visit_run(&mut self, run: &Run) {
        self.chars += run.text.chars().count();
        self.words += run.text.split_whitespace().count();
        if !run.marks.is_empty() {
            self.formatted_runs += 1;
        }
    }
}

impl Document {
    /// Plain text with nodes and list items separated by newlines
    pub fn plain_text(&self) -> String {
        let mut collector = PlainTextCollector::default();
        collector.visit_document(self);
        collector.finish()
    }
}
