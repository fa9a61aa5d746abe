//! # Page properties
//!
//! Database-style typed values attached to pages. Each `PropertyType` gets a
//! `PropertyKind` that knows its default configuration, how to display a
//! value, and how to parse user input. Kinds live in an explicit registry
//! table; nothing registers itself as a side effect of being linked in.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Text,
    Number,
    Select,
    MultiSelect,
    Date,
    Checkbox,
    Url,
    Email,
}

impl PropertyType {
    pub const ALL: [PropertyType; 8] = [
        PropertyType::Text,
        PropertyType::Number,
        PropertyType::Select,
        PropertyType::MultiSelect,
        PropertyType::Date,
        PropertyType::Checkbox,
        PropertyType::Url,
        PropertyType::Email,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Select => "select",
            PropertyType::MultiSelect => "multi_select",
            PropertyType::Date => "date",
            PropertyType::Checkbox => "checkbox",
            PropertyType::Url => "url",
            PropertyType::Email => "email",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Empty,
    Text(String),
    Number(f64),
    Select(String),
    MultiSelect(Vec<String>),
    /// ISO `YYYY-MM-DD`
    Date(String),
    Checkbox(bool),
    Url(String),
    Email(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyConfig {
    /// Allowed options for select / multi_select
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Fixed decimal places for number display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// A named property column on a page collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyType,
    #[serde(default)]
    pub config: PropertyConfig,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            config: PropertyConfig::default(),
        }
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.config.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    #[error("No property kind registered for {0}")]
    Unregistered(PropertyType),

    #[error("Invalid {kind} value {input:?}: {reason}")]
    InvalidInput {
        kind: PropertyType,
        input: String,
        reason: String,
    },
}

fn invalid(kind: PropertyType, input: &str, reason: &str) -> PropertyError {
    PropertyError::InvalidInput {
        kind,
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Capabilities of one property type
pub trait PropertyKind: Send + Sync {
    fn property_type(&self) -> PropertyType;

    fn default_config(&self) -> PropertyConfig {
        PropertyConfig::default()
    }

    fn display(&self, value: &PropertyValue, config: &PropertyConfig) -> String;

    /// Parse raw user input. Blank input clears the value.
    fn parse_input(&self, input: &str, config: &PropertyConfig) -> Result<PropertyValue, PropertyError>;
}

/// Display shared by the string-backed kinds
fn display_string(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Text(s)
        | PropertyValue::Select(s)
        | PropertyValue::Date(s)
        | PropertyValue::Url(s)
        | PropertyValue::Email(s) => s.clone(),
        PropertyValue::MultiSelect(items) => items.join(", "),
        PropertyValue::Number(n) => n.to_string(),
        PropertyValue::Checkbox(b) => b.to_string(),
        PropertyValue::Empty => String::new(),
    }
}

struct TextKind;

impl PropertyKind for TextKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Text
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        display_string(value)
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        if input.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        Ok(PropertyValue::Text(input.to_string()))
    }
}

struct NumberKind;

impl PropertyKind for NumberKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Number
    }

    fn display(&self, value: &PropertyValue, config: &PropertyConfig) -> String {
        match (value, config.decimals) {
            (PropertyValue::Number(n), Some(decimals)) => format!("{:.*}", decimals as usize, n),
            (value, _) => display_string(value),
        }
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(PropertyValue::Number(n)),
            _ => Err(invalid(PropertyType::Number, input, "not a finite number")),
        }
    }
}

struct SelectKind;

impl PropertyKind for SelectKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Select
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        display_string(value)
    }

    fn parse_input(&self, input: &str, config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let choice = input.trim();
        if choice.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        if !config.options.is_empty() && !config.options.iter().any(|o| o == choice) {
            return Err(invalid(PropertyType::Select, input, "not one of the configured options"));
        }
        Ok(PropertyValue::Select(choice.to_string()))
    }
}

struct MultiSelectKind;

impl PropertyKind for MultiSelectKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::MultiSelect
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        display_string(value)
    }

    /// Comma separated; duplicates collapse, order of first mention is kept
    fn parse_input(&self, input: &str, config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let mut choices: Vec<String> = Vec::new();
        for choice in input.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if !config.options.is_empty() && !config.options.iter().any(|o| o == choice) {
                return Err(invalid(
                    PropertyType::MultiSelect,
                    input,
                    &format!("{choice:?} is not one of the configured options"),
                ));
            }
            if !choices.iter().any(|c| c == choice) {
                choices.push(choice.to_string());
            }
        }
        if choices.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        Ok(PropertyValue::MultiSelect(choices))
    }
}

struct DateKind;

impl PropertyKind for DateKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Date
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        match value {
            PropertyValue::Date(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| date.format("%b %-d, %Y").to_string())
                .unwrap_or_else(|_| raw.clone()),
            value => display_string(value),
        }
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(|date| PropertyValue::Date(date.format("%Y-%m-%d").to_string()))
            .map_err(|e| invalid(PropertyType::Date, input, &e.to_string()))
    }
}

struct CheckboxKind;

impl PropertyKind for CheckboxKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Checkbox
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        match value {
            PropertyValue::Checkbox(true) => "[x]".to_string(),
            PropertyValue::Checkbox(false) | PropertyValue::Empty => "[ ]".to_string(),
            value => display_string(value),
        }
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        match input.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" | "x" => Ok(PropertyValue::Checkbox(true)),
            "false" | "no" | "off" | "0" | "" => Ok(PropertyValue::Checkbox(false)),
            _ => Err(invalid(PropertyType::Checkbox, input, "expected a yes/no value")),
        }
    }
}

struct UrlKind;

impl PropertyKind for UrlKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Url
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        display_string(value)
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| invalid(PropertyType::Url, input, "must start with http:// or https://"))?;
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            return Err(invalid(PropertyType::Url, input, "missing or malformed host"));
        }
        Ok(PropertyValue::Url(trimmed.to_string()))
    }
}

struct EmailKind;

impl PropertyKind for EmailKind {
    fn property_type(&self) -> PropertyType {
        PropertyType::Email
    }

    fn display(&self, value: &PropertyValue, _config: &PropertyConfig) -> String {
        display_string(value)
    }

    fn parse_input(&self, input: &str, _config: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(PropertyValue::Empty);
        }
        let valid = match trimmed.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !trimmed.contains(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(invalid(PropertyType::Email, input, "not an email address"));
        }
        Ok(PropertyValue::Email(trimmed.to_string()))
    }
}

/// Lookup table from property type to its kind
pub struct PropertyRegistry {
    kinds: HashMap<PropertyType, Box<dyn PropertyKind>>,
    builtins_loaded: bool,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            builtins_loaded: false,
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.init_builtins();
        registry
    }

    /// Register the built-in kinds once. Returns whether this call did the
    /// work; later calls leave existing registrations untouched.
    pub fn init_builtins(&mut self) -> bool {
        if self.builtins_loaded {
            return false;
        }
        let builtins: [Box<dyn PropertyKind>; 8] = [
            Box::new(TextKind),
            Box::new(NumberKind),
            Box::new(SelectKind),
            Box::new(MultiSelectKind),
            Box::new(DateKind),
            Box::new(CheckboxKind),
            Box::new(UrlKind),
            Box::new(EmailKind),
        ];
        for kind in builtins {
            self.kinds.entry(kind.property_type()).or_insert(kind);
        }
        self.builtins_loaded = true;
        true
    }

    /// Register a kind, replacing any previous one for the same type
    pub fn register(&mut self, kind: Box<dyn PropertyKind>) -> Option<Box<dyn PropertyKind>> {
        self.kinds.insert(kind.property_type(), kind)
    }

    pub fn get(&self, property_type: PropertyType) -> Result<&dyn PropertyKind, PropertyError> {
        self.kinds
            .get(&property_type)
            .map(|kind| kind.as_ref())
            .ok_or(PropertyError::Unregistered(property_type))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn default_config(&self, property_type: PropertyType) -> Result<PropertyConfig, PropertyError> {
        Ok(self.get(property_type)?.default_config())
    }

    pub fn display(&self, schema: &PropertySchema, value: &PropertyValue) -> Result<String, PropertyError> {
        Ok(self.get(schema.kind)?.display(value, &schema.config))
    }

    pub fn parse_input(&self, schema: &PropertySchema, input: &str) -> Result<PropertyValue, PropertyError> {
        self.get(schema.kind)?.parse_input(input, &schema.config)
    }

    /// Process-wide registry with the built-ins, created on first use
    pub fn global() -> &'static PropertyRegistry {
        static GLOBAL: OnceLock<PropertyRegistry> = OnceLock::new();
        GLOBAL.get_or_init(PropertyRegistry::with_builtins)
    }
}

impl Default for PropertyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_every_type() {
        let registry = PropertyRegistry::with_builtins();
        for property_type in PropertyType::ALL {
            assert_eq!(registry.get(property_type).unwrap().property_type(), property_type);
        }
    }

    #[test]
    fn test_init_builtins_is_idempotent() {
        let mut registry = PropertyRegistry::new();
        assert!(registry.init_builtins());
        assert!(!registry.init_builtins());
        assert_eq!(registry.len(), PropertyType::ALL.len());
    }

    #[test]
    fn test_init_keeps_custom_registration() {
        struct Shouting;
        impl PropertyKind for Shouting {
            fn property_type(&self) -> PropertyType {
                PropertyType::Text
            }
            fn display(&self, value: &PropertyValue, _: &PropertyConfig) -> String {
                display_string(value).to_uppercase()
            }
            fn parse_input(&self, input: &str, _: &PropertyConfig) -> Result<PropertyValue, PropertyError> {
                Ok(PropertyValue::Text(input.to_string()))
            }
        }

        let mut registry = PropertyRegistry::new();
        registry.register(Box::new(Shouting));
        registry.init_builtins();

        let schema = PropertySchema::new("Name", PropertyType::Text);
        let shown = registry.display(&schema, &PropertyValue::Text("hi".into())).unwrap();
        assert_eq!(shown, "HI");
    }

    #[test]
    fn test_unregistered_kind() {
        let registry = PropertyRegistry::new();
        let schema = PropertySchema::new("Score", PropertyType::Number);
        assert_eq!(
            registry.parse_input(&schema, "1"),
            Err(PropertyError::Unregistered(PropertyType::Number))
        );
    }

    #[test]
    fn test_parse_and_display() {
        let registry = PropertyRegistry::global();

        let number = PropertySchema {
            config: PropertyConfig {
                decimals: Some(2),
                ..Default::default()
            },
            ..PropertySchema::new("Cost", PropertyType::Number)
        };
        let value = registry.parse_input(&number, " 3.5 ").unwrap();
        assert_eq!(value, PropertyValue::Number(3.5));
        assert_eq!(registry.display(&number, &value).unwrap(), "3.50");
        assert!(registry.parse_input(&number, "three").is_err());

        let date = PropertySchema::new("Due", PropertyType::Date);
        let value = registry.parse_input(&date, "2024-03-09").unwrap();
        assert_eq!(registry.display(&date, &value).unwrap(), "Mar 9, 2024");
        assert!(registry.parse_input(&date, "2024-13-01").is_err());

        let done = PropertySchema::new("Done", PropertyType::Checkbox);
        assert_eq!(registry.parse_input(&done, "Yes").unwrap(), PropertyValue::Checkbox(true));
        assert_eq!(registry.display(&done, &PropertyValue::Empty).unwrap(), "[ ]");
    }

    #[test]
    fn test_select_options_are_enforced() {
        let registry = PropertyRegistry::global();
        let status = PropertySchema::new("Status", PropertyType::Select).with_options(&["todo", "done"]);
        assert_eq!(
            registry.parse_input(&status, "done").unwrap(),
            PropertyValue::Select("done".into())
        );
        assert!(registry.parse_input(&status, "blocked").is_err());

        let tags = PropertySchema::new("Tags", PropertyType::MultiSelect).with_options(&["a", "b"]);
        assert_eq!(
            registry.parse_input(&tags, "b, a, b").unwrap(),
            PropertyValue::MultiSelect(vec!["b".into(), "a".into()])
        );
        assert!(registry.parse_input(&tags, "a, c").is_err());
        assert_eq!(registry.parse_input(&tags, " , ").unwrap(), PropertyValue::Empty);
    }

    #[test]
    fn test_url_and_email() {
        let registry = PropertyRegistry::global();
        let url = PropertySchema::new("Link", PropertyType::Url);
        assert!(registry.parse_input(&url, "https://example.com").is_ok());
        assert!(registry.parse_input(&url, "example.com").is_err());
        assert!(registry.parse_input(&url, "https://").is_err());

        let email = PropertySchema::new("Owner", PropertyType::Email);
        assert!(registry.parse_input(&email, "ana@example.com").is_ok());
        assert!(registry.parse_input(&email, "ana@localhost").is_err());
        assert!(registry.parse_input(&email, "@example.com").is_err());
    }

    #[test]
    fn test_values_serialize_tagged() {
        let value = PropertyValue::MultiSelect(vec!["x".into()]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"type": "multi_select", "value": ["x"]}));
        assert_eq!(
            serde_json::to_value(PropertyValue::Empty).unwrap(),
            serde_json::json!({"type": "empty"})
        );
    }
}
