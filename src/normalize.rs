//! Normalization of loosely-typed property bags into [`Item`]s and [`Card`]s.
//!
//! Feed entries disagree about shapes: `in-reply-to` shows up as a bare URL,
//! a list of URLs, or a list of citation objects. Each property is decoded
//! through a small untagged enum whose variant order is the fallback order.
//! Anything that matches no variant is dropped with a debug event; a bad
//! property never costs the caller the rest of the item.

use crate::models::{Card, Content, Item, Properties};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// A URL reference: a bare string or a citation carrying a `url`.
#[derive(Deserialize)]
#[serde(untagged)]
enum UrlRef {
    Url(String),
    Cite { url: String },
}

impl From<UrlRef> for String {
    fn from(r: UrlRef) -> String {
        match r {
            UrlRef::Url(url) | UrlRef::Cite { url } => url,
        }
    }
}

/// A category: a bare term or a tag object carrying a `value`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Category {
    Term(String),
    Tag { value: String },
}

impl From<Category> for String {
    fn from(c: Category) -> String {
        match c {
            Category::Term(value) | Category::Tag { value } => value,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentShape {
    Text(String),
    Parts {
        html: Option<String>,
        value: Option<String>,
        text: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CardShape {
    Reference(String),
    Props(Properties),
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!("skipping {} value with unexpected shape: {}", key, e);
            None
        }
    }
}

/// A list whose elements decode as `T`; a bare value counts as a list of one
/// when `allow_single` is set. Bad elements are dropped one by one.
fn list_of<T>(key: &str, value: &Value, allow_single: bool) -> Vec<String>
where
    T: DeserializeOwned + Into<String>,
{
    match value {
        Value::Array(values) => values
            .iter()
            .filter_map(|v| decode::<T>(key, v))
            .map(Into::into)
            .collect(),
        single if allow_single => decode::<T>(key, single).map(Into::into).into_iter().collect(),
        _ => {
            debug!("skipping {}: expected a list", key);
            Vec::new()
        }
    }
}

fn string(props: &Properties, key: &str) -> Option<String> {
    match props.get(key)? {
        Value::String(s) => Some(s.clone()),
        _ => {
            debug!("skipping {}: expected a string", key);
            None
        }
    }
}

/// Builds a [`Card`] from `name`, `url`, `photo`, `longitude`, `latitude`,
/// `country-name` and `locality`. Missing or non-string keys stay `None`.
pub fn map_card_from(props: &Properties) -> Card {
    Card {
        name: string(props, "name"),
        url: string(props, "url"),
        photo: string(props, "photo"),
        longitude: string(props, "longitude"),
        latitude: string(props, "latitude"),
        country_name: string(props, "country-name"),
        locality: string(props, "locality"),
        ..Card::default()
    }
}

fn card(key: &str, value: &Value) -> Option<Card> {
    match decode::<CardShape>(key, value)? {
        CardShape::Props(props) => Some(map_card_from(&props)),
        CardShape::Reference(s) if s.starts_with("http://") || s.starts_with("https://") => Some(Card {
            url: Some(s),
            ..Card::default()
        }),
        CardShape::Reference(s) => Some(Card {
            name: Some(s),
            ..Card::default()
        }),
    }
}

fn content(value: &Value) -> Option<Content> {
    match decode::<ContentShape>("content", value)? {
        ContentShape::Text(text) => Some(Content { html: None, text: Some(text) }),
        ContentShape::Parts { html, value, text } => {
            let text = value.or(text);
            if html.is_none() && text.is_none() {
                return None;
            }
            Some(Content { html, text })
        }
    }
}

/// Parses the timestamp forms seen in the wild: RFC3339 and the looser
/// `YYYY-MM-DD HH:MM[:SS]±hhmm` variants microformats publishers emit.
/// Zone-less values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M%z", "%Y-%m-%dT%H:%M%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn rfc3339(dt: DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Derives a stable ID from `uid`, else `url`, else the source bag itself.
fn derive_id(item: &Item, props: &Properties) -> String {
    let key = match (&item.uid, &item.url) {
        (Some(uid), _) if !uid.is_empty() => uid.clone(),
        (_, Some(url)) if !url.is_empty() => url.clone(),
        _ => Value::Object(props.clone()).to_string(),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Maps a property bag onto an [`Item`], using the current instant when the
/// bag has no usable `published`.
pub fn map_item_from(props: &Properties) -> Item {
    map_item_at(props, Utc::now())
}

/// [`map_item_from`] with an explicit fallback instant for `published`.
pub fn map_item_at(props: &Properties, now: DateTime<Utc>) -> Item {
    let published = match string(props, "published") {
        Some(raw) => match parse_timestamp(&raw) {
            Some(dt) => rfc3339(dt),
            None => {
                debug!("unparseable published {:?}, using ingestion time", raw);
                rfc3339(now.fixed_offset())
            }
        },
        None => rfc3339(now.fixed_offset()),
    };

    let mut item = Item::new(published);
    item.name = string(props, "name");
    item.url = string(props, "url");
    item.uid = string(props, "uid");
    item.updated = string(props, "updated");

    if let Some(v) = props.get("author") {
        item.author = card("author", v);
    }
    if let Some(v) = props.get("checkin") {
        item.checkin = card("checkin", v);
    }
    if let Some(v) = props.get("content") {
        item.content = content(v);
    }

    if let Some(v) = props.get("like-of") {
        item.like_of = list_of::<String>("like-of", v, false);
    }
    if let Some(v) = props.get("bookmark-of") {
        item.bookmark_of = list_of::<String>("bookmark-of", v, false);
    }
    if let Some(v) = props.get("repost-of") {
        item.repost_of = list_of::<String>("repost-of", v, true);
    }
    if let Some(v) = props.get("in-reply-to") {
        item.in_reply_to = list_of::<UrlRef>("in-reply-to", v, true);
    }
    if let Some(v) = props.get("category") {
        item.category = list_of::<Category>("category", v, true);
    }
    if let Some(v) = props.get("photo") {
        item.photo = list_of::<String>("photo", v, true);
    }

    match props.get("_is_read") {
        Some(Value::Bool(read)) => item.read = *read,
        Some(_) => debug!("skipping _is_read: expected a bool"),
        None => {}
    }

    item.id = match string(props, "_id") {
        Some(id) if !id.is_empty() => id,
        _ => derive_id(&item, props),
    };

    item
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
