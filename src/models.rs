use serde::{Deserialize, Serialize};
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

/// A person or a place: the author of an entry or its check-in location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Card {
    #[serde(rename = "type", default = "card_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

fn card_type() -> String {
    "card".to_string()
}

fn entry_type() -> String {
    "entry".to_string()
}

fn feed_type() -> String {
    "feed".to_string()
}

impl Default for Card {
    fn default() -> Self {
        Self {
            kind: card_type(),
            name: None,
            url: None,
            photo: None,
            longitude: None,
            latitude: None,
            country_name: None,
            locality: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The canonical, normalized timeline entry.
///
/// Items are immutable once stored. `read` is filled in from the channel's
/// read set when a page is served, never written back into the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Item {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "type", default = "entry_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkin: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub like_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repost_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_reply_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    pub published: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(rename = "_is_read", default)]
    pub read: bool,
}

impl Item {
    pub fn new(published: String) -> Self {
        Self {
            id: String::new(),
            kind: entry_type(),
            name: None,
            url: None,
            uid: None,
            author: None,
            checkin: None,
            content: None,
            like_of: Vec::new(),
            repost_of: Vec::new(),
            bookmark_of: Vec::new(),
            in_reply_to: Vec::new(),
            photo: Vec::new(),
            category: Vec::new(),
            published,
            updated: None,
            read: false,
        }
    }

    /// Parsed `published`, if it holds an RFC3339 timestamp.
    pub fn published_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.published).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub unread: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(rename = "type", default = "feed_type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Feed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            kind: feed_type(),
            url: url.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub before: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub after: String,
}

/// One window of a channel's timeline. Recomputed for every query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub items: Vec<Item>,
    #[serde(default)]
    pub paging: Pagination,
}

/// A loosely-typed property bag as found in jf2 documents and simplified
/// microformats.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Feeds per channel, keyed by channel UID.
pub type FeedMap = BTreeMap<String, Vec<Feed>>;
