//! Content-type dispatch: turns a fetched body into normalized [`Item`]s.

use crate::error::{Error, Result};
use crate::microformats::{self, Document};
use crate::models::{Feed, Item, Properties};
use crate::normalize;
use feed_rs::parser;
use serde_json::{json, Value};
use tracing::debug;

/// Wrap width for the plain-text rendition of HTML content.
const TEXT_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Mf2,
    Jf2,
    Syndication,
}

/// `application/rss+xml; charset=utf-8` -> `application/rss+xml`
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_mf2_document(bytes: &[u8]) -> bool {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| v.get("items").map(Value::is_array))
        .unwrap_or(false)
}

fn detect(url: &str, content_type: &str, bytes: &[u8]) -> Result<Format> {
    match media_type(content_type).as_str() {
        "application/mf2+json" => Ok(Format::Mf2),
        "application/jf2+json" => Ok(Format::Jf2),
        "application/json" if is_mf2_document(bytes) => Ok(Format::Mf2),
        "application/rss+xml" | "application/atom+xml" | "application/xml" | "text/xml"
        | "application/feed+json" | "application/json" => Ok(Format::Syndication),
        "text/html" => Err(Error::malformed(url, "HTML pages need a microformats parser")),
        other => Err(Error::malformed(url, format!("unsupported content type {:?}", other))),
    }
}

/// Parses a fetched body into items, choosing the parser by content type.
pub fn parse_entries(url: &str, content_type: &str, bytes: &[u8]) -> Result<Vec<Item>> {
    let items: Vec<Item> = match detect(url, content_type, bytes)? {
        Format::Mf2 => {
            let doc: Document = serde_json::from_slice(bytes).map_err(|e| Error::malformed(url, e))?;
            microformats::entries(&doc)
                .into_iter()
                .map(microformats::convert_raw_entry)
                .collect()
        }
        Format::Jf2 => jf2_entries(url, bytes)?
            .iter()
            .map(normalize::map_item_from)
            .collect(),
        Format::Syndication => {
            let feed = parser::parse(bytes).map_err(|e| Error::malformed(url, e))?;
            feed.entries
                .iter()
                .map(|entry| normalize::map_item_from(&entry_properties(entry)))
                .collect()
        }
    };
    debug!("parsed {} items from {}", items.len(), url);
    Ok(items)
}

/// Feed metadata for search results: the URL plus a display name when the
/// document carries one.
pub fn feed_header(url: &str, content_type: &str, bytes: &[u8]) -> Result<Feed> {
    let name = match detect(url, content_type, bytes)? {
        Format::Mf2 => {
            let doc: Document = serde_json::from_slice(bytes).map_err(|e| Error::malformed(url, e))?;
            microformats::feed_name(&doc)
        }
        Format::Jf2 => {
            let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::malformed(url, e))?;
            value.get("name").and_then(Value::as_str).map(str::to_string)
        }
        Format::Syndication => {
            let feed = parser::parse(bytes).map_err(|e| Error::malformed(url, e))?;
            feed.title.map(|t| t.content)
        }
    };
    Ok(Feed {
        name,
        ..Feed::new(url)
    })
}

fn jf2_entries(url: &str, bytes: &[u8]) -> Result<Vec<Properties>> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::malformed(url, e))?;
    let Value::Object(mut root) = value else {
        return Err(Error::malformed(url, "jf2 document is not an object"));
    };
    match root.remove("children") {
        Some(Value::Array(children)) => Ok(children
            .into_iter()
            .filter_map(|child| match child {
                Value::Object(props) => Some(props),
                _ => {
                    debug!("skipping non-object jf2 child in {}", url);
                    None
                }
            })
            .collect()),
        Some(_) => Err(Error::malformed(url, "jf2 children is not a list")),
        None => Ok(vec![root]),
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH).trim().to_string()
}

/// Renders a syndication entry as a jf2 property bag.
fn entry_properties(entry: &feed_rs::model::Entry) -> Properties {
    let mut props = Properties::new();
    props.insert("type".into(), json!("entry"));
    if !entry.id.is_empty() {
        props.insert("uid".into(), json!(entry.id));
    }
    if let Some(title) = &entry.title {
        props.insert("name".into(), json!(title.content));
    }
    if let Some(link) = entry.links.first() {
        props.insert("url".into(), json!(link.href));
    }
    if let Some(published) = entry.published.or(entry.updated) {
        props.insert("published".into(), json!(published.to_rfc3339()));
    }
    if let Some(updated) = entry.updated {
        props.insert("updated".into(), json!(updated.to_rfc3339()));
    }
    if let Some(author) = entry.authors.first() {
        let mut card = Properties::new();
        card.insert("name".into(), json!(author.name));
        if let Some(uri) = &author.uri {
            card.insert("url".into(), json!(uri));
        }
        props.insert("author".into(), Value::Object(card));
    }

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()));
    if let Some(html) = body {
        props.insert("content".into(), json!({ "value": html_to_text(&html), "html": html }));
    }

    let categories: Vec<&str> = entry.categories.iter().map(|c| c.term.as_str()).collect();
    if !categories.is_empty() {
        props.insert("category".into(), json!(categories));
    }

    let photos: Vec<String> = entry
        .media
        .iter()
        .flat_map(|m| {
            m.content
                .iter()
                .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
                .chain(m.thumbnails.iter().map(|t| t.image.uri.clone()))
        })
        .collect();
    if !photos.is_empty() {
        props.insert("photo".into(), json!(photos));
    }

    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example notes</title>
    <link>https://example.com/</link>
    <description>notes</description>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <guid>https://example.com/1</guid>
      <pubDate>Tue, 10 Jun 2003 04:00:00 GMT</pubDate>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <category>tech</category>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <guid>https://example.com/2</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom notes</title>
  <id>urn:uuid:feed</id>
  <updated>2024-01-02T03:04:05Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:uuid:entry-1</id>
    <link href="https://example.org/a"/>
    <updated>2024-01-02T03:04:05Z</updated>
    <author><name>Ann</name><uri>https://ann.example/</uri></author>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn rss_entries_normalize() {
        let items = parse_entries("https://example.com/rss", "application/rss+xml; charset=utf-8", RSS.as_bytes())
            .unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.name.as_deref(), Some("First"));
        assert_eq!(first.url.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.uid.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.published, "2003-06-10T04:00:00Z");
        assert_eq!(first.category, vec!["tech"]);
        let content = first.content.as_ref().expect("content");
        assert!(content.html.as_deref().unwrap().contains("<b>world</b>"));
        assert!(content.text.as_deref().unwrap().contains("Hello"));
        assert!(!first.id.is_empty());

        // no pubDate: published is still filled
        assert!(items[1].published_at().is_some());
    }

    #[test]
    fn atom_entries_fall_back_to_updated() {
        let items = parse_entries("https://example.org/atom", "application/atom+xml", ATOM.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.published, "2024-01-02T03:04:05Z");
        assert_eq!(item.author.as_ref().and_then(|a| a.name.as_deref()), Some("Ann"));
        assert_eq!(item.author.as_ref().and_then(|a| a.url.as_deref()), Some("https://ann.example/"));
    }

    #[test]
    fn mf2_json_is_detected_by_shape() {
        let body = r#"{"items":[{"type":["h-entry"],"properties":{"name":["hi"],"published":["2020-01-01T00:00:00Z"]}}]}"#;
        for content_type in ["application/mf2+json", "application/json"] {
            let items = parse_entries("https://example.com/", content_type, body.as_bytes()).unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].name.as_deref(), Some("hi"));
        }
    }

    #[test]
    fn jf2_children_and_single_entries() {
        let feed = r#"{"type":"feed","name":"jf2 feed","children":[
            {"type":"entry","name":"a","category":"tech"},
            "junk",
            {"type":"entry","name":"b"}
        ]}"#;
        let items = parse_entries("https://example.com/jf2", "application/jf2+json", feed.as_bytes()).unwrap();
        assert_eq!(items.iter().map(|i| i.name.as_deref().unwrap()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(items[0].category, vec!["tech"]);

        let single = r#"{"type":"entry","name":"solo"}"#;
        let items = parse_entries("https://example.com/jf2", "application/jf2+json", single.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);

        let header = feed_header("https://example.com/jf2", "application/jf2+json", feed.as_bytes()).unwrap();
        assert_eq!(header.name.as_deref(), Some("jf2 feed"));
    }

    #[test]
    fn html_and_unknown_types_are_malformed() {
        for content_type in ["text/html; charset=utf-8", "image/png", ""] {
            let err = parse_entries("https://example.com/", content_type, b"<html></html>").unwrap_err();
            assert!(matches!(err, Error::MalformedSource { .. }), "{}", content_type);
        }
    }

    #[test]
    fn broken_xml_is_malformed() {
        let err = parse_entries("https://example.com/rss", "application/rss+xml", b"not a feed at all").unwrap_err();
        assert!(matches!(err, Error::MalformedSource { .. }));
    }

    #[test]
    fn feed_header_uses_document_title() {
        let feed = feed_header("https://example.com/rss", "text/xml", RSS.as_bytes()).unwrap();
        assert_eq!(feed.kind, "feed");
        assert_eq!(feed.url, "https://example.com/rss");
        assert_eq!(feed.name.as_deref(), Some("Example notes"));
    }
}
