//! # HTML → Document
//!
//! Lenient two-stage parse: tokens are assembled into a loose element tree
//! (unclosed tags are closed implicitly, stray close tags dropped), then the
//! tree is mapped onto the supported node and mark set. Parsing never fails;
//! markup outside the supported set degrades to plain text.

use crate::entities;
use crate::lexer::{is_self_closing, lex, tag_name, Token};
use crate::model::{normalize_runs, Document, ListItem, Mark, Marks, Node, Run};

/// Elements that never have content
const VOID_ELEMENTS: &[&str] = &[
    "br", "img", "hr", "input", "meta", "link", "wbr", "col", "source",
];

/// Inline elements whose text flows into the surrounding paragraph
const INLINE_ELEMENTS: &[&str] = &[
    "strong", "b", "em", "i", "u", "s", "strike", "del", "br", "span", "a", "code", "mark",
    "sub", "sup", "small", "font", "label", "abbr", "cite", "kbd", "q", "img",
];

/// Opening one of these closes an open `<p>`
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "div", "blockquote", "pre", "table",
    "section", "article", "hr",
];

#[derive(Debug, Clone, PartialEq)]
enum HtmlNode {
    Element { name: String, children: Vec<HtmlNode> },
    Text(String),
}

/// Parse editor-surface HTML into a document
pub fn parse(html: &str) -> Document {
    let tree = build_tree(html);
    let mut builder = DocumentBuilder::default();
    builder.push_all(&tree);
    builder.finish()
}

fn build_tree(html: &str) -> Vec<HtmlNode> {
    // Stack of open elements; index 0 is the synthetic root
    let mut stack: Vec<(String, Vec<HtmlNode>)> = vec![(String::new(), Vec::new())];

    for result in lex(html) {
        let (token, raw) = match result {
            Ok(spanned) => {
                let raw = &html[spanned.span.start..spanned.span.end];
                (Some(spanned.token), raw)
            }
            Err(err) => (None, &html[err.span.start..err.span.end]),
        };

        match token {
            Some(Token::OpenTag(slice)) => {
                let name = tag_name(slice);
                implicit_close(&mut stack, &name);
                if VOID_ELEMENTS.contains(&name.as_str()) || is_self_closing(slice) {
                    push_child(
                        &mut stack,
                        HtmlNode::Element {
                            name,
                            children: Vec::new(),
                        },
                    );
                } else {
                    stack.push((name, Vec::new()));
                }
            }
            Some(Token::CloseTag(slice)) => {
                let name = tag_name(slice);
                let open_at = stack.iter().skip(1).rposition(|(open, _)| *open == name);
                if let Some(index) = open_at {
                    // rposition over the skipped iterator is offset by one
                    close_until(&mut stack, index + 1);
                }
            }
            Some(Token::Declaration(_)) => {}
            Some(Token::Text(text)) => push_text(&mut stack, text),
            Some(Token::StrayAngle) | None => push_text(&mut stack, raw),
        }
    }

    close_until(&mut stack, 1);
    stack.pop().map(|(_, children)| children).unwrap_or_default()
}

fn implicit_close(stack: &mut Vec<(String, Vec<HtmlNode>)>, opening: &str) {
    let top = match stack.last() {
        Some((name, _)) if stack.len() > 1 => name.as_str(),
        _ => return,
    };

    let closes_top = match top {
        "li" => opening == "li",
        "p" => BLOCK_ELEMENTS.contains(&opening),
        _ => false,
    };
    if closes_top {
        let depth = stack.len() - 1;
        close_until(stack, depth);
    }
}

/// Pop open elements until the stack has `depth` entries
fn close_until(stack: &mut Vec<(String, Vec<HtmlNode>)>, depth: usize) {
    while stack.len() > depth.max(1) {
        if let Some((name, children)) = stack.pop() {
            push_child(stack, HtmlNode::Element { name, children });
        }
    }
}

fn push_child(stack: &mut [(String, Vec<HtmlNode>)], node: HtmlNode) {
    if let Some((_, children)) = stack.last_mut() {
        children.push(node);
    }
}

fn push_text(stack: &mut [(String, Vec<HtmlNode>)], raw: &str) {
    // Source line breaks are layout, not content; <br> carries real breaks
    let flattened = raw.replace("\r\n", " ").replace(['\n', '\r', '\t'], " ");
    let text = entities::decode(&flattened);
    if text.is_empty() {
        return;
    }
    if let Some((_, children)) = stack.last_mut() {
        if let Some(HtmlNode::Text(prev)) = children.last_mut() {
            prev.push_str(&text);
            return;
        }
        children.push(HtmlNode::Text(text));
    }
}

/// Maps the loose element tree onto document nodes
#[derive(Default)]
struct DocumentBuilder {
    nodes: Vec<Node>,
    /// Inline content seen outside any block element
    loose: Vec<Run>,
}

impl DocumentBuilder {
    fn push_all(&mut self, nodes: &[HtmlNode]) {
        for node in nodes {
            self.push(node);
        }
    }

    fn push(&mut self, node: &HtmlNode) {
        match node {
            HtmlNode::Text(text) => {
                if self.loose.is_empty() && text.trim().is_empty() {
                    return;
                }
                self.loose.push(Run::plain(text.clone()));
            }
            HtmlNode::Element { name, children } => match name.as_str() {
                "p" => {
                    self.flush_loose();
                    self.nodes.push(Node::paragraph(inline_runs(children)));
                }
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    self.flush_loose();
                    let level = name[1..].parse::<u8>().unwrap_or(1);
                    self.nodes.push(Node::heading(level, inline_runs(children)));
                }
                "ul" => {
                    self.flush_loose();
                    self.nodes.push(Node::BulletedList {
                        items: list_items(children),
                    });
                }
                "ol" => {
                    self.flush_loose();
                    self.nodes.push(Node::OrderedList {
                        items: list_items(children),
                    });
                }
                other if INLINE_ELEMENTS.contains(&other) => {
                    let mut runs = Vec::new();
                    collect_inline(node, Marks::NONE, &mut runs);
                    self.loose.extend(runs);
                }
                _ => {
                    // Unknown wrapper: ignored structurally, content kept
                    self.flush_loose();
                    self.push_all(children);
                    self.flush_loose();
                }
            },
        }
    }

    fn flush_loose(&mut self) {
        if self.loose.is_empty() {
            return;
        }
        let mut runs = std::mem::take(&mut self.loose);
        while runs.last().is_some_and(|r| r.text.trim().is_empty()) {
            runs.pop();
        }
        if !runs.is_empty() {
            self.nodes.push(Node::paragraph(normalize_runs(runs)));
        }
    }

    fn finish(mut self) -> Document {
        self.flush_loose();
        Document::from_nodes(self.nodes)
    }
}

fn inline_runs(children: &[HtmlNode]) -> Vec<Run> {
    let mut runs = Vec::new();
    for child in children {
        collect_inline(child, Marks::NONE, &mut runs);
    }
    normalize_runs(runs)
}

fn collect_inline(node: &HtmlNode, marks: Marks, out: &mut Vec<Run>) {
    match node {
        HtmlNode::Text(text) => out.push(Run::new(text.clone(), marks)),
        HtmlNode::Element { name, children } => {
            if name == "br" {
                out.push(Run::new("\n", marks));
                return;
            }
            let marks = match Mark::from_tag(name) {
                Some(mark) => marks.with(mark),
                None => marks,
            };
            for child in children {
                collect_inline(child, marks, out);
            }
        }
    }
}

fn list_items(children: &[HtmlNode]) -> Vec<ListItem> {
    let mut items = Vec::new();
    for child in children {
        match child {
            HtmlNode::Element { name, children } if name == "li" => {
                items.push(ListItem::new(inline_runs(children)));
            }
            HtmlNode::Text(text) if text.trim().is_empty() => {}
            other => {
                // Content outside <li> still counts as an item
                let mut runs = Vec::new();
                collect_inline(other, Marks::NONE, &mut runs);
                let runs = normalize_runs(runs);
                if !runs.is_empty() {
                    items.push(ListItem::new(runs));
                }
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_yields_one_paragraph() {
        assert_eq!(parse(""), Document::new());
        assert_eq!(parse("   \n  "), Document::new());
    }

    #[test]
    fn test_parse_paragraph_with_marks() {
        let doc = parse("<p>Hello <strong>bold <em>both</em></strong> and <u>under</u></p>");
        let runs = doc.nodes[0].runs().unwrap();
        assert_eq!(runs.len(), 5);
        assert_eq!(runs[0], Run::plain("Hello "));
        assert!(runs[1].marks.bold && !runs[1].marks.italic);
        assert!(runs[2].marks.bold && runs[2].marks.italic);
        assert_eq!(runs[3], Run::plain(" and "));
        assert!(runs[4].marks.underline);
    }

    #[test]
    fn test_parse_headings_and_lists() {
        let doc = parse("<h2>Title</h2><ul><li>one</li><li>two</li></ul><ol><li>first</ol>");
        assert_eq!(doc.nodes.len(), 3);
        assert!(matches!(doc.nodes[0], Node::Heading { level: 2, .. }));
        assert_eq!(doc.nodes[1].items().unwrap().len(), 2);
        assert_eq!(doc.nodes[2].items().unwrap()[0].plain_text(), "first");
    }

    #[test]
    fn test_unknown_tags_keep_text() {
        let doc = parse("<div><span class=\"x\">kept</span></div><blink>also</blink>");
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.nodes[0].plain_text(), "kept");
        assert_eq!(doc.nodes[1].plain_text(), "also");
    }

    #[test]
    fn test_bare_text_becomes_paragraph() {
        let doc = parse("just <b>text</b>");
        assert_eq!(doc.nodes.len(), 1);
        assert_eq!(doc.nodes[0].plain_text(), "just text");
    }

    #[test]
    fn test_unclosed_and_stray_tags() {
        let doc = parse("<p>one<p>two</span>");
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.nodes[1].plain_text(), "two");
    }

    #[test]
    fn test_line_breaks() {
        let doc = parse("<p>a<br>b</p><p><br></p>");
        assert_eq!(doc.nodes[0].plain_text(), "a\nb");
        assert_eq!(doc.nodes[1], Node::empty_paragraph());
    }

    #[test]
    fn test_entities_decoded() {
        let doc = parse("<p>1 &lt; 2 &amp;&amp; 3 &gt; 2</p>");
        assert_eq!(doc.nodes[0].plain_text(), "1 < 2 && 3 > 2");
    }

    #[test]
    fn test_stray_angle_is_text() {
        let doc = parse("<p>a < b</p>");
        assert_eq!(doc.nodes[0].plain_text(), "a < b");
    }
}
