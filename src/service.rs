//! The microsub operations, as one facade over the registry, the timeline
//! store and the fetcher.

use crate::channels::ChannelRegistry;
use crate::error::{Error, Result};
use crate::fetcher::{Fetch, FetchResponse};
use crate::formats;
use crate::kv::KeyValueStore;
use crate::models::{Channel, Feed, Item, Timeline};
use crate::scheduler;
use crate::timeline::{TimelineStore, DEFAULT_PAGE_SIZE};
use futures::future::join_all;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Alternate-link types worth following during search.
const FEED_TYPES: &[&str] = &[
    "text/html",
    "application/json",
    "application/xml",
    "text/xml",
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
    "application/mf2+json",
];

/// A `<link rel=alternate>` found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Alternate {
    href: String,
    media_type: String,
}

fn alternate_links(html: &str) -> Result<Vec<Alternate>> {
    let link_tag = Regex::new(r"(?is)<link\b[^>]*>").map_err(|e| Error::malformed("<pattern>", e))?;
    let attribute = Regex::new(r#"(?is)([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .map_err(|e| Error::malformed("<pattern>", e))?;

    let mut found = Vec::new();
    for tag in link_tag.find_iter(html) {
        let (mut rel, mut media_type, mut href) = (String::new(), String::new(), None);
        for cap in attribute.captures_iter(tag.as_str()) {
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map_or("", |m| m.as_str());
            match cap[1].to_ascii_lowercase().as_str() {
                "rel" => rel = value.to_ascii_lowercase(),
                "type" => media_type = value.trim().to_ascii_lowercase(),
                "href" => href = Some(value.trim().to_string()),
                _ => {}
            }
        }
        let is_alternate = rel.split_whitespace().any(|r| r == "alternate");
        if let (true, Some(href)) = (is_alternate, href) {
            found.push(Alternate { href, media_type });
        }
    }
    Ok(found)
}

/// Whether an alternate's declared type is one search follows. Parameters
/// such as `; charset=utf-8` are ignored.
fn is_feed_type(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    FEED_TYPES.contains(&essence)
}

fn has_scheme(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://")
}

/// The microsub operations over one store and one fetcher.
pub struct Microsub {
    registry: ChannelRegistry,
    timeline: TimelineStore,
    fetcher: Arc<dyn Fetch>,
}

impl Microsub {
    /// Builds the registry and timeline store over one shared store.
    pub fn new(store: Arc<dyn KeyValueStore>, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            registry: ChannelRegistry::new(store.clone()),
            timeline: TimelineStore::new(store),
            fetcher,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn timeline(&self) -> &TimelineStore {
        &self.timeline
    }

    fn ensure_channel(&self, uid: &str) -> Result<()> {
        if self.registry.exists(uid)? {
            Ok(())
        } else {
            Err(Error::channel_not_found(uid))
        }
    }

    /// One page of a channel, newest first. Cursors come from a previous
    /// page's `paging`.
    pub fn timeline_get(&self, before: Option<&str>, after: Option<&str>, channel: &str) -> Result<Timeline> {
        self.ensure_channel(channel)?;
        self.timeline.page(channel, before, after, DEFAULT_PAGE_SIZE)
    }

    /// Marks items read; returns how many were unread.
    pub fn mark_read(&self, channel: &str, ids: &[String]) -> Result<usize> {
        self.ensure_channel(channel)?;
        self.timeline.mark_read(channel, ids)
    }

    /// Marks items unread again; returns how many changed.
    pub fn mark_unread(&self, channel: &str, ids: &[String]) -> Result<usize> {
        self.ensure_channel(channel)?;
        self.timeline.mark_unread(channel, ids)
    }

    /// Every channel in display order, with unread counts.
    pub fn channels_get_list(&self) -> Result<Vec<Channel>> {
        self.registry.list()
    }

    /// Creates a channel under a fresh uid.
    pub fn channels_create(&self, name: &str) -> Result<Channel> {
        self.registry.create(name)
    }

    /// Renames a channel.
    pub fn channels_update(&self, uid: &str, name: &str) -> Result<Channel> {
        self.registry.update(uid, name)
    }

    /// Deletes a channel; unknown uids are ignored.
    pub fn channels_delete(&self, uid: &str) -> Result<()> {
        self.registry.delete(uid)
    }

    /// Reorders channels; `notifications` stays first.
    pub fn channels_order(&self, uids: &[String]) -> Result<()> {
        self.registry.order(uids)
    }

    /// Feeds followed by a channel.
    pub fn follow_get_list(&self, uid: &str) -> Result<Vec<Feed>> {
        self.registry.feeds(uid)
    }

    /// Fetches the feed, records it, then ingests what was fetched. A fetch
    /// failure leaves the channel unchanged; a parse failure does not undo
    /// the follow.
    pub async fn follow_url(&self, uid: &str, url: &str) -> Result<Feed> {
        self.ensure_channel(uid)?;
        let response = self.fetcher.fetch(url).await?;
        let feed = self.registry.follow(uid, url)?;
        match scheduler::ingest(&self.timeline, uid, url, &response) {
            Ok(n) => info!("followed {} in {}, {} new items", url, uid, n),
            Err(e) => warn!("followed {} in {} but could not ingest it: {}", url, uid, e),
        }
        Ok(feed)
    }

    /// Stops following a feed. Items already ingested stay.
    pub fn unfollow_url(&self, uid: &str, url: &str) -> Result<()> {
        if !self.registry.unfollow(uid, url)? {
            debug!("{} was not followed in {}", url, uid);
        }
        Ok(())
    }

    /// Feeds reachable from a URL or a bare host name: the document itself
    /// when it is a feed, else its `rel=alternate` links that parse as feeds.
    pub async fn search(&self, query: &str) -> Result<Vec<Feed>> {
        let query = query.trim();
        let candidates = if has_scheme(query) {
            vec![query.to_string()]
        } else {
            vec![format!("https://{}", query), format!("http://{}", query)]
        };

        for candidate in candidates {
            if !self.fetcher.probe(&candidate).await {
                debug!("{} is not reachable", candidate);
                continue;
            }
            let response = match self.fetcher.fetch(&candidate).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("search skipping {}: {}", candidate, e);
                    continue;
                }
            };
            return self.feeds_on_page(&candidate, &response).await;
        }
        info!("nothing reachable for {:?}", query);
        Ok(Vec::new())
    }

    /// The page itself when it parses as a feed, else its alternates that do.
    async fn feeds_on_page(&self, base: &str, response: &FetchResponse) -> Result<Vec<Feed>> {
        if let Ok(feed) = formats::feed_header(base, &response.content_type, &response.body) {
            return Ok(vec![feed]);
        }

        let page_url = Url::parse(base).map_err(|e| Error::malformed(base, e))?;
        let html = String::from_utf8_lossy(&response.body);
        let mut targets: Vec<String> = Vec::new();
        for link in alternate_links(&html)? {
            if !is_feed_type(&link.media_type) {
                continue;
            }
            match page_url.join(&link.href) {
                Ok(resolved) if !targets.contains(&resolved.to_string()) => targets.push(resolved.to_string()),
                Ok(_) => {}
                Err(e) => debug!("bad alternate href {:?} on {}: {}", link.href, base, e),
            }
        }

        let checks = targets.iter().map(|target| async move {
            let response = self.fetcher.fetch(target).await?;
            formats::feed_header(target, &response.content_type, &response.body)
        });
        let results = join_all(checks).await;

        Ok(targets
            .iter()
            .zip(results)
            .filter_map(|(target, result)| match result {
                Ok(feed) => Some(feed),
                Err(e) => {
                    debug!("alternate {} rejected: {}", target, e);
                    None
                }
            })
            .collect())
    }

    /// The items a URL would contribute, without following it.
    pub async fn preview_url(&self, url: &str) -> Result<Timeline> {
        let response = self.fetcher.fetch(url).await?;
        let mut items = formats::parse_entries(url, &response.content_type, &response.body)?;
        items.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
        Ok(Timeline {
            items,
            ..Timeline::default()
        })
    }

    /// A stored item by id, even if no channel lists it any more.
    pub fn item(&self, id: &str) -> Result<Item> {
        self.timeline.item(id)?.ok_or_else(|| Error::NotFound {
            kind: "item",
            id: id.to_string(),
        })
    }
}
