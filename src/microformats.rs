//! Parsed microformats2 documents and their conversion into [`Item`]s.
//!
//! The HTML parser lives elsewhere; this module starts from its JSON output
//! (`{"items": [...], "rels": {...}, "rel-urls": {...}}`).

use crate::models::{Item, Properties};
use crate::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Properties that stay lists after simplification. Everything else keeps
/// only its first value.
const MULTI_VALUED: &[&str] = &[
    "like-of",
    "bookmark-of",
    "repost-of",
    "in-reply-to",
    "photo",
    "category",
    "syndication",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub items: Vec<Microformat>,
    #[serde(default)]
    pub rels: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "rel-urls")]
    pub rel_urls: BTreeMap<String, RelUrl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelUrl {
    #[serde(default)]
    pub rels: Vec<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One node of the tree: `h-entry`, `h-card`, `h-cite`, `h-feed`, ...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Microformat {
    #[serde(rename = "type")]
    pub kind: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Microformat>,
}

impl Microformat {
    pub fn is(&self, kind: &str) -> bool {
        self.kind.iter().any(|k| k == kind)
    }

    /// First plain-text value of a property.
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.properties.get(name)?.iter().find_map(|v| match v {
            PropertyValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

/// A single property value. Variant order is the decode order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Embedded {
        html: String,
        #[serde(default)]
        value: String,
    },
    Nested(Box<Microformat>),
    Image {
        value: String,
        alt: String,
    },
    Other(Value),
}

fn simplify_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Text(s) => Value::String(s.clone()),
        PropertyValue::Embedded { html, value } => {
            serde_json::json!({ "html": html, "value": value })
        }
        PropertyValue::Nested(node) => {
            let mut props = simplify(node);
            if let Some(value) = &node.value {
                props.entry("value").or_insert_with(|| Value::String(value.clone()));
            }
            Value::Object(props)
        }
        PropertyValue::Image { value, .. } => Value::String(value.clone()),
        PropertyValue::Other(v) => v.clone(),
    }
}

/// Flattens a node into a jf2-style property bag: `type` without its `h-`
/// prefix, single-valued properties unwrapped, nested nodes simplified in
/// place.
pub fn simplify(node: &Microformat) -> Properties {
    let mut props = Properties::new();
    if let Some(kind) = node.kind.first() {
        let kind = kind.strip_prefix("h-").unwrap_or(kind);
        props.insert("type".to_string(), Value::String(kind.to_string()));
    }
    for (name, values) in &node.properties {
        let mut simplified: Vec<Value> = values.iter().map(simplify_value).collect();
        let value = if MULTI_VALUED.contains(&name.as_str()) {
            Value::Array(simplified)
        } else if simplified.is_empty() {
            continue;
        } else {
            simplified.swap_remove(0)
        };
        props.insert(name.clone(), value);
    }
    props
}

/// Converts a parsed `h-entry` node into an [`Item`].
pub fn convert_raw_entry(node: &Microformat) -> Item {
    normalize::map_item_from(&simplify(node))
}

/// [`convert_raw_entry`] with an explicit fallback instant for `published`.
pub fn convert_raw_entry_at(node: &Microformat, now: DateTime<Utc>) -> Item {
    normalize::map_item_at(&simplify(node), now)
}

/// All `h-entry` nodes of a document, at top level or inside an `h-feed`.
pub fn entries(doc: &Document) -> Vec<&Microformat> {
    let mut found = Vec::new();
    for item in &doc.items {
        if item.is("h-entry") {
            found.push(item);
        } else if item.is("h-feed") {
            found.extend(item.children.iter().filter(|c| c.is("h-entry")));
        }
    }
    found
}

/// Name of the first `h-feed` or `h-card` in the document.
pub fn feed_name(doc: &Document) -> Option<String> {
    doc.items
        .iter()
        .filter(|item| item.is("h-feed") || item.is("h-card"))
        .find_map(|item| item.first_text("name"))
        .map(str::to_string)
}
