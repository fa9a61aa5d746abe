//! Page and block records plus the patches that mutate them

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::properties::PropertyValue;

/// Closed set of block kinds. Type strings this build doesn't know land in
/// `Unknown` so newer content still loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    Text,
    Heading1,
    Heading2,
    Heading3,
    BulletedListItem,
    NumberedListItem,
    Image,
    TwoColumn,
    Table,
    Divider,
    Quote,
    Callout,
    ToggleList,
    Embed,
    FileAttachment,
    Unknown(String),
}

impl BlockType {
    pub const KNOWN: [BlockType; 15] = [
        BlockType::Text,
        BlockType::Heading1,
        BlockType::Heading2,
        BlockType::Heading3,
        BlockType::BulletedListItem,
        BlockType::NumberedListItem,
        BlockType::Image,
        BlockType::TwoColumn,
        BlockType::Table,
        BlockType::Divider,
        BlockType::Quote,
        BlockType::Callout,
        BlockType::ToggleList,
        BlockType::Embed,
        BlockType::FileAttachment,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            BlockType::Text => "text",
            BlockType::Heading1 => "heading_1",
            BlockType::Heading2 => "heading_2",
            BlockType::Heading3 => "heading_3",
            BlockType::BulletedListItem => "bulleted_list_item",
            BlockType::NumberedListItem => "numbered_list_item",
            BlockType::Image => "image",
            BlockType::TwoColumn => "two_column",
            BlockType::Table => "table",
            BlockType::Divider => "divider",
            BlockType::Quote => "quote",
            BlockType::Callout => "callout",
            BlockType::ToggleList => "toggle_list",
            BlockType::Embed => "embed",
            BlockType::FileAttachment => "file_attachment",
            BlockType::Unknown(raw) => raw,
        }
    }

    pub fn from_name(name: &str) -> BlockType {
        BlockType::KNOWN
            .iter()
            .find(|known| known.as_str() == name)
            .cloned()
            .unwrap_or_else(|| BlockType::Unknown(name.to_string()))
    }

    /// Types that may own child blocks
    pub fn is_container(&self) -> bool {
        matches!(self, BlockType::ToggleList | BlockType::TwoColumn)
    }

    /// Types whose `content.text` is rich HTML edited through a text session
    pub fn is_text_bearing(&self) -> bool {
        matches!(
            self,
            BlockType::Text
                | BlockType::Heading1
                | BlockType::Heading2
                | BlockType::Heading3
                | BlockType::Quote
                | BlockType::Callout
        )
    }

    pub fn heading_level(&self) -> Option<u8> {
        match self {
            BlockType::Heading1 => Some(1),
            BlockType::Heading2 => Some(2),
            BlockType::Heading3 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(BlockType::from_name(&name))
    }
}

/// Which side of a two-column block a child sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Left,
    Right,
}

impl Column {
    pub fn as_str(self) -> &'static str {
        match self {
            Column::Left => "left",
            Column::Right => "right",
        }
    }
}

/// Anything with an id and a sibling sort key
pub trait Positioned {
    fn id(&self) -> &str;
    fn pos(&self) -> i64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub page_id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub parent_id: String,
    #[serde(default)]
    pub pos: i64,
    #[serde(default)]
    pub content: Value,
}

impl Block {
    pub fn new(
        id: impl Into<String>,
        page_id: impl Into<String>,
        block_type: BlockType,
        parent_id: impl Into<String>,
        pos: i64,
    ) -> Self {
        Self {
            id: id.into(),
            page_id: page_id.into(),
            block_type,
            parent_id: parent_id.into(),
            pos,
            content: Value::Object(Map::new()),
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_text(self, html: &str) -> Self {
        self.with_content(serde_json::json!({ "text": html }))
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == self.page_id
    }

    /// Raw content field, `None` when missing or when content isn't an object
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.content.as_object()?.get(key)
    }

    /// String content field; missing or mistyped reads as empty
    pub fn field_str(&self, key: &str) -> &str {
        self.field(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Rich HTML of a text-bearing block
    pub fn text_html(&self) -> &str {
        self.field_str("text")
    }

    /// Column of a two-column child; anything but "right" is the left column
    pub fn column(&self) -> Column {
        match self.field_str("column") {
            "right" => Column::Right,
            _ => Column::Left,
        }
    }
}

impl Positioned for Block {
    fn id(&self) -> &str {
        &self.id
    }

    fn pos(&self) -> i64 {
        self.pos
    }
}

/// Partial block update. `content` is merged key by key into the existing
/// object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPatch {
    pub block_type: Option<BlockType>,
    pub parent_id: Option<String>,
    pub pos: Option<i64>,
    pub content: Option<Map<String, Value>>,
}

impl BlockPatch {
    pub fn text(html: impl Into<String>) -> Self {
        Self::field("text", Value::String(html.into()))
    }

    pub fn field(key: &str, value: Value) -> Self {
        let mut content = Map::new();
        content.insert(key.to_string(), value);
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn pos(pos: i64) -> Self {
        Self {
            pos: Some(pos),
            ..Default::default()
        }
    }

    pub fn reparent(parent_id: impl Into<String>, pos: i64) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            pos: Some(pos),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_type.is_none()
            && self.parent_id.is_none()
            && self.pos.is_none()
            && self.content.is_none()
    }

    pub fn apply_to(&self, block: &mut Block) {
        if let Some(block_type) = &self.block_type {
            block.block_type = block_type.clone();
        }
        if let Some(parent_id) = &self.parent_id {
            block.parent_id = parent_id.clone();
        }
        if let Some(pos) = self.pos {
            block.pos = pos;
        }
        if let Some(fields) = &self.content {
            if !block.content.is_object() {
                block.content = Value::Object(Map::new());
            }
            if let Value::Object(existing) = &mut block.content {
                for (key, value) in fields {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub pos: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Page {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_id: None,
            pos: 0,
            icon: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_pos(mut self, pos: i64) -> Self {
        self.pos = pos;
        self
    }
}

impl Positioned for Page {
    fn id(&self) -> &str {
        &self.id
    }

    fn pos(&self) -> i64 {
        self.pos
    }
}

/// Partial page update. `parent_id` and `icon` use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePatch {
    pub title: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub pos: Option<i64>,
    pub icon: Option<Option<String>>,
    pub properties: Option<BTreeMap<String, PropertyValue>>,
}

impl PagePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn reparent(parent_id: Option<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }

    pub fn property(name: impl Into<String>, value: PropertyValue) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(name.into(), value);
        Self {
            properties: Some(properties),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, page: &mut Page) {
        if let Some(title) = &self.title {
            page.title = title.clone();
        }
        if let Some(parent_id) = &self.parent_id {
            page.parent_id = parent_id.clone();
        }
        if let Some(pos) = self.pos {
            page.pos = pos;
        }
        if let Some(icon) = &self.icon {
            page.icon = icon.clone();
        }
        if let Some(properties) = &self.properties {
            for (name, value) in properties {
                match value {
                    PropertyValue::Empty => {
                        page.properties.remove(name);
                    }
                    value => {
                        page.properties.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }
}

/// Record kinds the optimistic overlay can track
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    type Patch: Clone + fmt::Debug + Send + Sync + 'static;

    /// Label used in logs ("block", "page")
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn parent_ref(&self) -> Option<&str>;

    fn apply(&mut self, patch: &Self::Patch);

    /// A patch that moves the entity to a different parent
    fn is_structural(&self, patch: &Self::Patch) -> bool;

    /// Same logical record regardless of id
    fn is_equivalent(&self, other: &Self) -> bool;

    /// Rewrite references to `from` (own id or parent) as `to`
    fn remap(&mut self, from: &str, to: &str);

    fn remap_patch(patch: &mut Self::Patch, from: &str, to: &str);

    fn patch_references(patch: &Self::Patch, id: &str) -> bool;
}

impl Entity for Block {
    type Patch = BlockPatch;

    const KIND: &'static str = "block";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_ref(&self) -> Option<&str> {
        Some(&self.parent_id)
    }

    fn apply(&mut self, patch: &BlockPatch) {
        patch.apply_to(self);
    }

    fn is_structural(&self, patch: &BlockPatch) -> bool {
        matches!(&patch.parent_id, Some(parent) if *parent != self.parent_id)
    }

    fn is_equivalent(&self, other: &Block) -> bool {
        self.page_id == other.page_id
            && self.block_type == other.block_type
            && self.parent_id == other.parent_id
            && self.pos == other.pos
            && self.content == other.content
    }

    fn remap(&mut self, from: &str, to: &str) {
        if self.id == from {
            self.id = to.to_string();
        }
        if self.parent_id == from {
            self.parent_id = to.to_string();
        }
    }

    fn remap_patch(patch: &mut BlockPatch, from: &str, to: &str) {
        if patch.parent_id.as_deref() == Some(from) {
            patch.parent_id = Some(to.to_string());
        }
    }

    fn patch_references(patch: &BlockPatch, id: &str) -> bool {
        patch.parent_id.as_deref() == Some(id)
    }
}

impl Entity for Page {
    type Patch = PagePatch;

    const KIND: &'static str = "page";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn parent_ref(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn apply(&mut self, patch: &PagePatch) {
        patch.apply_to(self);
    }

    fn is_structural(&self, patch: &PagePatch) -> bool {
        matches!(&patch.parent_id, Some(parent) if *parent != self.parent_id)
    }

    fn is_equivalent(&self, other: &Page) -> bool {
        self.title == other.title
            && self.parent_id == other.parent_id
            && self.pos == other.pos
            && self.icon == other.icon
            && self.properties == other.properties
    }

    fn remap(&mut self, from: &str, to: &str) {
        if self.id == from {
            self.id = to.to_string();
        }
        if self.parent_id.as_deref() == Some(from) {
            self.parent_id = Some(to.to_string());
        }
    }

    fn remap_patch(patch: &mut PagePatch, from: &str, to: &str) {
        if let Some(Some(parent)) = &patch.parent_id {
            if parent == from {
                patch.parent_id = Some(Some(to.to_string()));
            }
        }
    }

    fn patch_references(patch: &PagePatch, id: &str) -> bool {
        matches!(&patch.parent_id, Some(Some(parent)) if parent == id)
    }
}
