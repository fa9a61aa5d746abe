//! # Block renderer
//!
//! Dispatches each block to the widget for its type and writes HTML through
//! an indenting context. Every block renders inside its own fault boundary:
//! a widget that returns an error or panics is replaced by an error
//! placeholder and its siblings are unaffected.

use std::panic::{self, AssertUnwindSafe};

use quire_document::{entities, normalize_runs, parse, render, render_inline, Document, Node, Run};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::ids::{is_temporary_id, DEFAULT_TEMP_PREFIX};
use crate::model::{Block, BlockType, Column};
use crate::tree::{partition, Partition};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Malformed {block_type} content: {reason}")]
    MalformedContent { block_type: String, reason: String },

    #[error("Widget panicked: {0}")]
    Panicked(String),
}

fn malformed(block: &Block, reason: &str) -> RenderError {
    RenderError::MalformedContent {
        block_type: block.block_type.to_string(),
        reason: reason.to_string(),
    }
}

/// Options for block rendering
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Emit editing affordances (contenteditable, pending markers, empty
    /// placeholders)
    pub editable: bool,
    /// Pretty print HTML
    pub pretty: bool,
    /// Indentation string
    pub indent: String,
    /// Prefix identifying unsaved blocks
    pub temp_id_prefix: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            editable: true,
            pretty: true,
            indent: "  ".to_string(),
            temp_id_prefix: DEFAULT_TEMP_PREFIX.to_string(),
        }
    }
}

impl RenderOptions {
    pub fn read_only() -> Self {
        Self {
            editable: false,
            ..Default::default()
        }
    }
}

struct Context<'o> {
    options: &'o RenderOptions,
    depth: usize,
    buffer: String,
}

impl<'o> Context<'o> {
    fn new(options: &'o RenderOptions) -> Self {
        Self {
            options,
            depth: 0,
            buffer: String::new(),
        }
    }

    /// Empty context at the same depth, for output that may be discarded
    fn scratch(&self) -> Self {
        Self {
            options: self.options,
            depth: self.depth,
            buffer: String::new(),
        }
    }

    fn add(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn add_line(&mut self, text: &str) {
        if self.options.pretty {
            self.add_indent();
        }
        self.add(text);
        if self.options.pretty {
            self.add("\n");
        }
    }

    fn add_indent(&mut self) {
        for _ in 0..self.depth {
            self.buffer.push_str(&self.options.indent);
        }
    }

    fn indent(&mut self) {
        self.depth += 1;
    }

    fn dedent(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
        }
    }

    fn get_output(self) -> String {
        self.buffer
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    entities::escape(value, &mut out);
    out
}

/// All runs of a document on one line, nodes separated by line breaks
fn inline_runs(doc: &Document) -> Vec<Run> {
    fn push_line(runs: &mut Vec<Run>, line: &[Run]) {
        if !runs.is_empty() {
            runs.push(Run::plain("\n"));
        }
        runs.extend_from_slice(line);
    }

    let mut runs = Vec::new();
    for node in &doc.nodes {
        match node {
            Node::Paragraph { runs: line } | Node::Heading { runs: line, .. } => push_line(&mut runs, line),
            Node::BulletedList { items } | Node::OrderedList { items } => {
                for item in items {
                    push_line(&mut runs, &item.runs);
                }
            }
        }
    }
    normalize_runs(runs)
}

fn inline_html(html: &str) -> (String, bool) {
    let runs = inline_runs(&parse(html));
    let empty = runs.is_empty();
    (render_inline(&runs), empty)
}

/// Render the blocks of `page_id` as HTML
pub fn render_page(blocks: &[Block], page_id: &str, options: &RenderOptions) -> String {
    let view = partition(blocks, page_id);
    let renderer = BlockRenderer::new(&view, options);

    let mut ctx = Context::new(options);
    ctx.add_line(&format!("<article class=\"page\" data-page-id=\"{}\">", escape_attr(page_id)));
    ctx.indent();
    for block in &view.roots {
        renderer.render_block(block, &mut ctx);
    }
    ctx.dedent();
    ctx.add_line("</article>");
    ctx.get_output()
}

/// Renders blocks of one partitioned page
pub struct BlockRenderer<'v, 'a> {
    view: &'v Partition<'a>,
    options: &'v RenderOptions,
}

impl<'v, 'a> BlockRenderer<'v, 'a> {
    pub fn new(view: &'v Partition<'a>, options: &'v RenderOptions) -> Self {
        Self { view, options }
    }

    /// Render a single block (and its children) on its own
    pub fn render(&self, block: &Block) -> String {
        let mut ctx = Context::new(self.options);
        self.render_block(block, &mut ctx);
        ctx.get_output()
    }

    fn render_block(&self, block: &Block, ctx: &mut Context) {
        isolate(block, ctx, |scratch| self.dispatch(block, scratch));
    }

    fn dispatch(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        match &block.block_type {
            BlockType::Text => self.rich_text(block, "div", ctx),
            BlockType::Heading1 | BlockType::Heading2 | BlockType::Heading3 => self.heading(block, ctx),
            BlockType::BulletedListItem => self.list(block, "ul", ctx),
            BlockType::NumberedListItem => self.list(block, "ol", ctx),
            BlockType::Image => self.image(block, ctx),
            BlockType::TwoColumn => self.two_column(block, ctx),
            BlockType::Table => self.table(block, ctx),
            BlockType::Divider => {
                ctx.add_line(&format!("<hr{}>", self.attrs(block)));
                Ok(())
            }
            BlockType::Quote => self.rich_text(block, "blockquote", ctx),
            BlockType::Callout => self.callout(block, ctx),
            BlockType::ToggleList => self.toggle(block, ctx),
            BlockType::Embed => self.embed(block, ctx),
            BlockType::FileAttachment => self.file(block, ctx),
            BlockType::Unknown(raw) => {
                ctx.add_line(&format!(
                    "<div{}><span class=\"block-placeholder\">Unsupported block type: {}</span></div>",
                    self.attrs(block),
                    escape_attr(raw)
                ));
                Ok(())
            }
        }
    }

    /// Common attributes: type class, id, and the pending marker for
    /// unsaved blocks in editable mode
    fn attrs(&self, block: &Block) -> String {
        let mut attrs = format!(
            " class=\"block block-{}\" data-block-id=\"{}\"",
            escape_attr(block.block_type.as_str()),
            escape_attr(&block.id)
        );
        if self.options.editable && is_temporary_id(&block.id, &self.options.temp_id_prefix) {
            attrs.push_str(" data-pending=\"true\"");
        }
        attrs
    }

    fn editable_attr(&self) -> &'static str {
        if self.options.editable {
            " contenteditable=\"true\""
        } else {
            ""
        }
    }

    fn placeholder(&self, block: &Block, text: &str, ctx: &mut Context) {
        ctx.add_line(&format!(
            "<div{}><span class=\"block-placeholder\">{}</span></div>",
            self.attrs(block),
            text
        ));
    }

    fn children(&self, parent: &Block, ctx: &mut Context) {
        for child in self.view.children_of(&parent.id) {
            self.render_block(child, ctx);
        }
    }

    fn rich_text(&self, block: &Block, tag: &str, ctx: &mut Context) -> Result<(), RenderError> {
        let doc = parse(block.text_html());
        if doc.is_empty() && !self.options.editable {
            return Ok(());
        }
        ctx.add_line(&format!("<{}{}{}>", tag, self.attrs(block), self.editable_attr()));
        ctx.indent();
        ctx.add_line(&render(&doc));
        ctx.dedent();
        ctx.add_line(&format!("</{}>", tag));
        Ok(())
    }

    fn heading(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let level = block.block_type.heading_level().unwrap_or(1);
        let (inner, empty) = inline_html(block.text_html());
        if empty && !self.options.editable {
            return Ok(());
        }
        ctx.add_line(&format!(
            "<h{level}{}{}>{}</h{level}>",
            self.attrs(block),
            self.editable_attr(),
            inner
        ));
        Ok(())
    }

    fn list(&self, block: &Block, tag: &str, ctx: &mut Context) -> Result<(), RenderError> {
        let items: Vec<String> = match block.field("items") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().unwrap_or("").to_string())
                .collect(),
            _ => vec![block.text_html().to_string()],
        };
        let rendered: Vec<(String, bool)> = items.iter().map(|item| inline_html(item)).collect();
        let all_empty = rendered.iter().all(|(_, empty)| *empty);
        if all_empty && !self.options.editable {
            return Ok(());
        }

        ctx.add_line(&format!("<{}{}>", tag, self.attrs(block)));
        ctx.indent();
        for (inner, empty) in &rendered {
            if *empty && !self.options.editable {
                continue;
            }
            ctx.add_line(&format!("<li{}>{}</li>", self.editable_attr(), inner));
        }
        ctx.dedent();
        ctx.add_line(&format!("</{}>", tag));
        Ok(())
    }

    fn image(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let src = match block.field_str("url") {
            "" => block.field_str("path"),
            url => url,
        };
        if src.is_empty() {
            if self.options.editable {
                self.placeholder(block, "Add an image", ctx);
            }
            return Ok(());
        }

        let caption = block.field_str("caption");
        ctx.add_line(&format!("<figure{}>", self.attrs(block)));
        ctx.indent();
        ctx.add_line(&format!("<img src=\"{}\" alt=\"{}\">", escape_attr(src), escape_attr(caption)));
        if !caption.is_empty() {
            ctx.add_line(&format!("<figcaption>{}</figcaption>", escape_attr(caption)));
        }
        ctx.dedent();
        ctx.add_line("</figure>");
        Ok(())
    }

    fn two_column(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        ctx.add_line(&format!("<div{}>", self.attrs(block)));
        ctx.indent();
        for column in [Column::Left, Column::Right] {
            ctx.add_line(&format!("<div class=\"column column-{}\">", column.as_str()));
            ctx.indent();
            for child in self.view.column_children(&block.id, column) {
                self.render_block(child, ctx);
            }
            ctx.dedent();
            ctx.add_line("</div>");
        }
        ctx.dedent();
        ctx.add_line("</div>");
        Ok(())
    }

    fn table(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let table = block
            .field("table")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(block, "content.table is missing"))?;

        let rows: &[Value] = match table.get("rows") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(rows)) => rows,
            Some(_) => return Err(malformed(block, "table.rows is not a list")),
        };
        let has_header = table.get("has_header").and_then(Value::as_bool).unwrap_or(false);

        ctx.add_line(&format!("<table{}>", self.attrs(block)));
        ctx.indent();
        for (index, row) in rows.iter().enumerate() {
            let cells = row
                .as_array()
                .ok_or_else(|| malformed(block, "table row is not a list"))?;
            let cell_tag = if has_header && index == 0 { "th" } else { "td" };

            let mut line = String::from("<tr>");
            for cell in cells {
                let text = match cell {
                    Value::String(s) => inline_html(s).0,
                    Value::Null => String::new(),
                    other => escape_attr(&other.to_string()),
                };
                line.push_str(&format!("<{cell_tag}>{text}</{cell_tag}>"));
            }
            line.push_str("</tr>");
            ctx.add_line(&line);
        }
        ctx.dedent();
        ctx.add_line("</table>");
        Ok(())
    }

    fn callout(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let doc = parse(block.text_html());
        if doc.is_empty() && !self.options.editable {
            return Ok(());
        }
        let icon = match block.field_str("icon") {
            "" => "💡",
            icon => icon,
        };
        ctx.add_line(&format!("<aside{}>", self.attrs(block)));
        ctx.indent();
        ctx.add_line(&format!("<span class=\"callout-icon\">{}</span>", escape_attr(icon)));
        ctx.add_line(&format!(
            "<div class=\"callout-body\"{}>{}</div>",
            self.editable_attr(),
            render(&doc)
        ));
        ctx.dedent();
        ctx.add_line("</aside>");
        Ok(())
    }

    fn toggle(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let (title, empty) = inline_html(block.text_html());
        let open = block.field("open").and_then(Value::as_bool).unwrap_or(false);
        let open_attr = if open { " open" } else { "" };

        ctx.add_line(&format!("<details{}{}>", self.attrs(block), open_attr));
        ctx.indent();
        if !empty || self.options.editable {
            ctx.add_line(&format!("<summary{}>{}</summary>", self.editable_attr(), title));
        }
        self.children(block, ctx);
        ctx.dedent();
        ctx.add_line("</details>");
        Ok(())
    }

    fn embed(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let url = block.field_str("url");
        if url.is_empty() {
            if self.options.editable {
                self.placeholder(block, "Paste a link to embed", ctx);
            }
            return Ok(());
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(malformed(block, "embed url must be http(s)"));
        }
        ctx.add_line(&format!(
            "<div{}><iframe src=\"{}\" loading=\"lazy\"></iframe></div>",
            self.attrs(block),
            escape_attr(url)
        ));
        Ok(())
    }

    fn file(&self, block: &Block, ctx: &mut Context) -> Result<(), RenderError> {
        let path = block.field_str("path");
        if path.is_empty() {
            if self.options.editable {
                self.placeholder(block, "Upload a file", ctx);
            }
            return Ok(());
        }
        let name = match block.field_str("name") {
            "" => path.rsplit('/').next().unwrap_or(path),
            name => name,
        };
        let size = block
            .field("size")
            .and_then(Value::as_u64)
            .map(|bytes| format!("<span class=\"file-size\">{}</span>", human_size(bytes)))
            .unwrap_or_default();
        ctx.add_line(&format!(
            "<div{}><a class=\"file-link\" href=\"{}\" download>{}</a>{}</div>",
            self.attrs(block),
            escape_attr(path),
            escape_attr(name),
            size
        ));
        Ok(())
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Run a widget against a scratch buffer. Its output is kept only if it
/// finished cleanly; errors and panics become an error placeholder.
fn isolate<F>(block: &Block, ctx: &mut Context, widget: F)
where
    F: FnOnce(&mut Context) -> Result<(), RenderError>,
{
    let mut scratch = ctx.scratch();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| widget(&mut scratch)));

    let error = match outcome {
        Ok(Ok(())) => {
            ctx.add(&scratch.get_output());
            return;
        }
        Ok(Err(error)) => error,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            RenderError::Panicked(message)
        }
    };

    warn!(
        block_id = %block.id,
        block_type = %block.block_type,
        error = %error,
        "block failed to render"
    );
    ctx.add_line(&format!(
        "<div class=\"block block-error\" data-block-id=\"{}\" data-block-type=\"{}\" role=\"alert\">This block could not be displayed</div>",
        escape_attr(&block.id),
        escape_attr(block.block_type.as_str())
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compact() -> RenderOptions {
        RenderOptions {
            pretty: false,
            ..Default::default()
        }
    }

    fn block(id: &str, block_type: BlockType, content: Value) -> Block {
        Block::new(id, "p1", block_type, "p1", 0).with_content(content)
    }

    fn render_one(block: &Block, options: &RenderOptions) -> String {
        let blocks = vec![block.clone()];
        let view = partition(&blocks, "p1");
        BlockRenderer::new(&view, options).render(block)
    }

    #[test]
    fn test_text_block() {
        let html = render_one(&block("b1", BlockType::Text, json!({"text": "<p>Hi <b>there</b></p>"})), &compact());
        assert_eq!(
            html,
            "<div class=\"block block-text\" data-block-id=\"b1\" contenteditable=\"true\"><p>Hi <strong>there</strong></p></div>"
        );
    }

    #[test]
    fn test_heading_levels() {
        let html = render_one(&block("h", BlockType::Heading2, json!({"text": "<p>Plan</p>"})), &compact());
        assert!(html.starts_with("<h2 class=\"block block-heading_2\""));
        assert!(html.ends_with(">Plan</h2>"));
    }

    #[test]
    fn test_list_items() {
        let html = render_one(
            &block("l", BlockType::NumberedListItem, json!({"items": ["one", "<em>two</em>"]})),
            &RenderOptions { editable: false, ..compact() },
        );
        assert_eq!(
            html,
            "<ol class=\"block block-numbered_list_item\" data-block-id=\"l\"><li>one</li><li><em>two</em></li></ol>"
        );
    }

    #[test]
    fn test_missing_fields_degrade_to_empty() {
        let html = render_one(&block("b1", BlockType::Quote, json!({"text": ["wrong"]})), &compact());
        assert!(html.contains("<blockquote"));
        assert!(html.contains("<p><br></p>"));
    }

    #[test]
    fn test_read_only_skips_empty_blocks() {
        let options = RenderOptions { pretty: false, ..RenderOptions::read_only() };
        for block_type in [BlockType::Text, BlockType::Heading1, BlockType::Image, BlockType::Embed, BlockType::FileAttachment] {
            assert_eq!(render_one(&block("e", block_type, json!({})), &options), "");
        }
        assert!(render_one(&block("d", BlockType::Divider, json!({})), &options).starts_with("<hr"));
    }

    #[test]
    fn test_pending_marker_only_when_editable() {
        let temp = block("temp-abc-1", BlockType::Divider, json!({}));
        assert!(render_one(&temp, &compact()).contains("data-pending=\"true\""));

        let read_only = RenderOptions { pretty: false, ..RenderOptions::read_only() };
        let html = render_one(&temp, &read_only);
        assert!(!html.contains("data-pending"));
        assert!(!html.contains("contenteditable"));
    }

    #[test]
    fn test_unknown_type_placeholder() {
        let html = render_one(&block("u", BlockType::Unknown("kanban".into()), json!({})), &compact());
        assert!(html.contains("Unsupported block type: kanban"));
        assert!(html.contains("block-kanban"));
    }

    #[test]
    fn test_table_with_header() {
        let table = json!({"table": {"has_header": true, "rows": [["Name", "Qty"], ["Apples", 3]]}});
        let html = render_one(&block("t", BlockType::Table, table), &compact());
        assert!(html.contains("<tr><th>Name</th><th>Qty</th></tr>"));
        assert!(html.contains("<tr><td>Apples</td><td>3</td></tr>"));
    }

    #[test]
    fn test_malformed_table_becomes_placeholder() {
        let html = render_one(&block("t", BlockType::Table, json!({})), &compact());
        assert!(html.contains("block-error"));
        assert!(html.contains("data-block-type=\"table\""));

        let html = render_one(&block("t", BlockType::Table, json!({"table": {"rows": [1]}})), &compact());
        assert!(html.contains("block-error"));
        assert!(!html.contains("<table"));
    }

    #[test]
    fn test_unsafe_embed_is_rejected() {
        let html = render_one(&block("e", BlockType::Embed, json!({"url": "javascript:alert(1)"})), &compact());
        assert!(html.contains("block-error"));
        assert!(!html.contains("iframe"));
    }

    #[test]
    fn test_file_attachment() {
        let html = render_one(
            &block("f", BlockType::FileAttachment, json!({"path": "uploads/p1/report.pdf", "size": 2048})),
            &compact(),
        );
        assert!(html.contains("href=\"uploads/p1/report.pdf\""));
        assert!(html.contains(">report.pdf</a>"));
        assert!(html.contains("2.0 KB"));
    }

    #[test]
    fn test_panicking_widget_is_contained() {
        let options = compact();
        let mut ctx = Context::new(&options);
        let b = block("b1", BlockType::Text, json!({}));

        isolate(&b, &mut ctx, |scratch| {
            scratch.add("partial output");
            panic!("widget blew up");
        });
        isolate(&b, &mut ctx, |scratch| {
            scratch.add("<p>ok</p>");
            Ok(())
        });

        let html = ctx.get_output();
        assert!(!html.contains("partial output"));
        assert!(html.contains("block-error"));
        assert!(html.ends_with("<p>ok</p>"));
    }

    #[test]
    fn test_pretty_output_indents_children() {
        let blocks = vec![
            block("t", BlockType::ToggleList, json!({"text": "More", "open": true})),
            Block::new("c", "p1", BlockType::Divider, "t", 0),
        ];
        let html = render_page(&blocks, "p1", &RenderOptions::default());
        assert_eq!(
            html,
            "<article class=\"page\" data-page-id=\"p1\">\n  <details class=\"block block-toggle_list\" data-block-id=\"t\" open>\n    <summary contenteditable=\"true\">More</summary>\n    <hr class=\"block block-divider\" data-block-id=\"c\">\n  </details>\n</article>\n"
        );
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(12), "12 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
