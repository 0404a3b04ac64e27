//! Channels and the feeds they follow, kept entirely in the key-value store.

use crate::error::{Error, Result};
use crate::kv::{KeyValueStore, Score, StoreExt, Txn};
use crate::models::{Channel, Feed};
use crate::timeline::{counter_key, drop_channel_timeline, read_counter};
use std::ops::Bound;
use std::sync::Arc;
use tracing::{info, warn};

const CHANNELS_KEY: &str = "channels";
const CHANNEL_SEQ_KEY: &str = "channels:seq";
const FEED_SEQ_KEY: &str = "feeds:seq";
const NEXT_UID_KEY: &str = "next_uid";

pub const FIRST_UID: i64 = 1_000_000;
pub const NOTIFICATIONS: &str = "notifications";
const DEFAULT_SORT_ORDER: i64 = 99999;

fn channel_key(uid: &str) -> String {
    format!("channel:{}", uid)
}

fn sortorder_key(uid: &str) -> String {
    format!("channel_sortorder_{}", uid)
}

fn feeds_key(uid: &str) -> String {
    format!("channel:{}:feeds", uid)
}

pub(crate) fn is_channel(tx: &dyn Txn, uid: &str) -> Result<bool> {
    Ok(tx.zscore(CHANNELS_KEY, uid)?.is_some())
}

fn ensure_channel(tx: &dyn Txn, uid: &str) -> Result<()> {
    if is_channel(tx, uid)? {
        Ok(())
    } else {
        Err(Error::channel_not_found(uid))
    }
}

fn load_channel(tx: &dyn Txn, uid: &str) -> Result<Channel> {
    let name = tx.hget(&channel_key(uid), "name")?.unwrap_or_else(|| uid.to_string());
    let unread = read_counter(tx, &counter_key(uid))?;
    Ok(Channel {
        uid: uid.to_string(),
        name,
        unread,
    })
}

fn sort_order(tx: &dyn Txn, uid: &str) -> Result<i64> {
    match tx.get(&sortorder_key(uid))? {
        None => Ok(DEFAULT_SORT_ORDER),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::StoreUnavailable(format!("sort order of {} is {:?}", uid, raw))),
    }
}

/// Adds the channel if it is new and (re)writes its name. An existing sort
/// order is kept.
fn insert_channel(tx: &mut dyn Txn, uid: &str, name: &str) -> Result<()> {
    if !is_channel(tx, uid)? {
        let seq = tx.incr(CHANNEL_SEQ_KEY, 1)?;
        tx.zadd(CHANNELS_KEY, uid, Score::new(0, seq as u64))?;
    }
    tx.hset(&channel_key(uid), "name", name)?;
    let order = if uid == NOTIFICATIONS { 1 } else { DEFAULT_SORT_ORDER };
    tx.setnx(&sortorder_key(uid), &order.to_string())?;
    Ok(())
}

fn current_next_uid(tx: &dyn Txn) -> Result<i64> {
    match tx.get(NEXT_UID_KEY)? {
        None => Ok(FIRST_UID),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::StoreUnavailable(format!("next_uid holds {:?}", raw))),
    }
}

#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl ChannelRegistry {
    /// A registry reading and writing through `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All channels in creation order, stably sorted by their sort-order key.
    /// If any sort key cannot be read, creation order is returned as is.
    pub fn list(&self) -> Result<Vec<Channel>> {
        let rows: Vec<(Channel, Result<i64>)> = self.store.atomic(|tx| {
            tx.zrange_by_score(CHANNELS_KEY, Bound::Unbounded, Bound::Unbounded, None, false)?
                .into_iter()
                .map(|(uid, _)| -> Result<(Channel, Result<i64>)> {
                    let channel = load_channel(tx, &uid)?;
                    Ok((channel, sort_order(tx, &uid)))
                })
                .collect()
        })?;

        let mut keyed = Vec::with_capacity(rows.len());
        let mut unsorted = Vec::with_capacity(rows.len());
        let mut failure = None;
        for (channel, key) in rows {
            match key {
                Ok(key) => keyed.push((key, channel.clone())),
                Err(e) => failure = Some(e),
            }
            unsorted.push(channel);
        }
        if let Some(e) = failure {
            warn!("cannot sort channels, using creation order: {}", e);
            return Ok(unsorted);
        }

        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, channel)| channel).collect())
    }

    /// The channel with its unread count, or `None` when unknown.
    pub fn get(&self, uid: &str) -> Result<Option<Channel>> {
        self.store.atomic(|tx| {
            if is_channel(tx, uid)? {
                load_channel(tx, uid).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Whether `uid` names a registered channel.
    pub fn exists(&self, uid: &str) -> Result<bool> {
        self.store.atomic(|tx| is_channel(tx, uid))
    }

    /// Creates a channel under the next free uid.
    pub fn create(&self, name: &str) -> Result<Channel> {
        let channel = self.store.atomic(|tx| {
            let next = current_next_uid(tx)?;
            let uid = format!("{:04}", next);
            tx.set(NEXT_UID_KEY, &(next + 1).to_string())?;
            insert_channel(tx, &uid, name)?;
            load_channel(tx, &uid)
        })?;
        info!("created channel {} ({})", channel.uid, channel.name);
        Ok(channel)
    }

    /// Renames a channel. Unknown uids are `NotFound`.
    pub fn update(&self, uid: &str, name: &str) -> Result<Channel> {
        self.store.atomic(|tx| {
            ensure_channel(tx, uid)?;
            tx.hset(&channel_key(uid), "name", name)?;
            load_channel(tx, uid)
        })
    }

    /// Removes the channel with its feeds, sort key and timeline. Item
    /// payloads stay reachable by id. Deleting an unknown channel is a no-op.
    pub fn delete(&self, uid: &str) -> Result<()> {
        let removed = self.store.atomic(|tx| {
            let removed = tx.zrem(CHANNELS_KEY, &[uid.to_string()])? > 0;
            tx.del(&channel_key(uid))?;
            tx.del(&sortorder_key(uid))?;
            tx.del(&feeds_key(uid))?;
            drop_channel_timeline(tx, uid)?;
            Ok(removed)
        })?;
        if removed {
            info!("deleted channel {}", uid);
        }
        Ok(())
    }

    /// Rewrites sort keys so channels list in the given order.
    /// `notifications` stays first.
    pub fn order(&self, uids: &[String]) -> Result<()> {
        self.store.atomic(|tx| {
            let mut position = 2;
            for uid in uids.iter().filter(|uid| *uid != NOTIFICATIONS) {
                ensure_channel(tx, uid)?;
                tx.set(&sortorder_key(uid), &position.to_string())?;
                position += 1;
            }
            Ok(())
        })
    }

    /// Followed feeds of a channel, oldest follow first.
    pub fn feeds(&self, uid: &str) -> Result<Vec<Feed>> {
        self.store.atomic(|tx| {
            ensure_channel(tx, uid)?;
            Ok(tx
                .zrange_by_score(&feeds_key(uid), Bound::Unbounded, Bound::Unbounded, None, false)?
                .into_iter()
                .map(|(url, _)| Feed::new(url))
                .collect())
        })
    }

    /// Adds a feed to the channel. Following a URL twice is a no-op.
    pub fn follow(&self, uid: &str, url: &str) -> Result<Feed> {
        let added = self.store.atomic(|tx| {
            ensure_channel(tx, uid)?;
            let key = feeds_key(uid);
            if tx.zscore(&key, url)?.is_some() {
                return Ok(false);
            }
            let seq = tx.incr(FEED_SEQ_KEY, 1)?;
            tx.zadd(&key, url, Score::new(0, seq as u64))
        })?;
        if added {
            info!("channel {} follows {}", uid, url);
        }
        Ok(Feed::new(url))
    }

    /// Returns whether the channel followed the URL.
    pub fn unfollow(&self, uid: &str, url: &str) -> Result<bool> {
        self.store.atomic(|tx| {
            ensure_channel(tx, uid)?;
            Ok(tx.zrem(&feeds_key(uid), &[url.to_string()])? > 0)
        })
    }

    /// Stores a sort key for `uid` unless it already has one.
    pub fn seed_sort_order(&self, uid: &str, order: i64) -> Result<()> {
        self.store
            .atomic(|tx| tx.setnx(&sortorder_key(uid), &order.to_string()).map(|_| ()))
    }

    /// Adds a known channel, keeping any sort order already stored.
    pub fn register(&self, channel: &Channel) -> Result<()> {
        self.store
            .atomic(|tx| insert_channel(tx, &channel.uid, &channel.name))
    }

    /// The uid the next [`ChannelRegistry::create`] will use.
    pub fn next_uid(&self) -> Result<i64> {
        self.store.atomic(|tx| current_next_uid(tx))
    }

    /// Raises the uid counter to at least `n`.
    pub fn set_next_uid(&self, n: i64) -> Result<()> {
        self.store.atomic(|tx| {
            let next = current_next_uid(tx)?.max(n);
            tx.set(NEXT_UID_KEY, &next.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::models::Item;
    use crate::timeline::TimelineStore;
    use pretty_assertions::assert_eq;

    fn create_test_registry() -> (ChannelRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ChannelRegistry::new(store.clone()), store)
    }

    fn uids(channels: &[Channel]) -> Vec<&str> {
        channels.iter().map(|c| c.uid.as_str()).collect()
    }

    #[test]
    fn test_create_allocates_sequential_uids() {
        let (registry, _store) = create_test_registry();
        let a = registry.create("Tech").unwrap();
        let b = registry.create("Music").unwrap();

        assert_eq!(a.uid, "1000000");
        assert_eq!(b.uid, "1000001");
        assert_eq!(a.unread, 0);
        assert_eq!(registry.next_uid().unwrap(), 1_000_002);
        assert_eq!(uids(&registry.list().unwrap()), vec!["1000000", "1000001"]);
    }

    #[test]
    fn test_notifications_sort_first() {
        let (registry, _store) = create_test_registry();
        registry
            .register(&Channel { uid: "home".into(), name: "Home".into(), unread: 0 })
            .unwrap();
        registry.create("Tech").unwrap();
        registry
            .register(&Channel { uid: NOTIFICATIONS.into(), name: "Notifications".into(), unread: 0 })
            .unwrap();

        assert_eq!(uids(&registry.list().unwrap()), vec!["notifications", "home", "1000000"]);
    }

    #[test]
    fn test_bad_sort_key_falls_back_to_creation_order() {
        let (registry, store) = create_test_registry();
        registry.create("A").unwrap();
        registry
            .register(&Channel { uid: NOTIFICATIONS.into(), name: "Notifications".into(), unread: 0 })
            .unwrap();
        store
            .atomic(|tx| tx.set("channel_sortorder_1000000", "garbage"))
            .unwrap();

        assert_eq!(uids(&registry.list().unwrap()), vec!["1000000", "notifications"]);
    }

    #[test]
    fn test_update_and_get() {
        let (registry, _store) = create_test_registry();
        let channel = registry.create("Old").unwrap();

        let updated = registry.update(&channel.uid, "New").unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(registry.get(&channel.uid).unwrap().unwrap().name, "New");
        assert_eq!(registry.get("nope").unwrap(), None);
        assert!(matches!(
            registry.update("nope", "x"),
            Err(Error::NotFound { kind: "channel", .. })
        ));
    }

    #[test]
    fn test_delete_removes_channel_state() {
        let (registry, store) = create_test_registry();
        let channel = registry.create("Gone").unwrap();
        registry.follow(&channel.uid, "https://example.com/feed").unwrap();

        registry.delete(&channel.uid).unwrap();
        assert!(!registry.exists(&channel.uid).unwrap());
        assert!(registry.list().unwrap().is_empty());
        assert!(matches!(registry.feeds(&channel.uid), Err(Error::NotFound { .. })));

        let leftovers = store
            .atomic(|tx| {
                Ok((
                    tx.get("channel_sortorder_1000000")?,
                    tx.zcard("channel:1000000:feeds")?,
                ))
            })
            .unwrap();
        assert_eq!(leftovers, (None, 0));

        // unknown channels are fine
        registry.delete("never-existed").unwrap();
    }

    #[test]
    fn test_delete_drops_timeline_but_keeps_items() {
        let (registry, store) = create_test_registry();
        let timeline = TimelineStore::new(store.clone());
        let channel = registry.create("Gone").unwrap();
        let mut item = Item::new("2024-01-01T10:00:00+00:00".to_string());
        item.id = "kept".to_string();
        assert!(timeline.append_if_registered(&channel.uid, &item).unwrap());

        registry.delete(&channel.uid).unwrap();
        let sizes = store
            .atomic(|tx| Ok((tx.zcard("timeline:1000000:posts")?, tx.zcard("timeline:1000000:unread")?)))
            .unwrap();
        assert_eq!(sizes, (0, 0));
        assert!(timeline.item("kept").unwrap().is_some());

        // a sweep that listed the channel before the delete writes nothing
        let mut late = item.clone();
        late.id = "late".to_string();
        assert!(!timeline.append_if_registered(&channel.uid, &late).unwrap());
        assert_eq!(timeline.unread_count(&channel.uid).unwrap(), 0);
        assert!(timeline.page(&channel.uid, None, None, 20).unwrap().items.is_empty());
        assert!(store.atomic(|tx| tx.get("channel:1000000:unread")).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_creates_get_distinct_uids() {
        let (registry, _store) = create_test_registry();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let registry = registry.clone();
                scope.spawn(move || {
                    for i in 0..10 {
                        registry.create(&format!("c{}-{}", t, i)).unwrap();
                    }
                });
            }
        });

        let channels = registry.list().unwrap();
        let mut seen: Vec<&str> = uids(&channels);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 80);
        assert_eq!(registry.next_uid().unwrap(), FIRST_UID + 80);
    }

    #[test]
    fn test_order() {
        let (registry, _store) = create_test_registry();
        let a = registry.create("A").unwrap();
        let b = registry.create("B").unwrap();
        let c = registry.create("C").unwrap();

        registry
            .order(&[c.uid.clone(), a.uid.clone(), b.uid.clone()])
            .unwrap();
        assert_eq!(uids(&registry.list().unwrap()), vec![c.uid.as_str(), a.uid.as_str(), b.uid.as_str()]);

        assert!(registry.order(&["missing".to_string()]).is_err());
        // a failed reorder changes nothing
        assert_eq!(uids(&registry.list().unwrap()), vec![c.uid.as_str(), a.uid.as_str(), b.uid.as_str()]);
    }

    #[test]
    fn test_follow_is_idempotent() {
        let (registry, _store) = create_test_registry();
        let channel = registry.create("Feeds").unwrap();

        registry.follow(&channel.uid, "https://a.example/feed").unwrap();
        registry.follow(&channel.uid, "https://b.example/feed").unwrap();
        registry.follow(&channel.uid, "https://a.example/feed").unwrap();

        let urls: Vec<String> = registry
            .feeds(&channel.uid)
            .unwrap()
            .into_iter()
            .map(|f| f.url)
            .collect();
        assert_eq!(urls, vec!["https://a.example/feed", "https://b.example/feed"]);

        assert!(registry.unfollow(&channel.uid, "https://a.example/feed").unwrap());
        assert!(!registry.unfollow(&channel.uid, "https://a.example/feed").unwrap());
        assert_eq!(registry.feeds(&channel.uid).unwrap().len(), 1);

        assert!(matches!(
            registry.follow("nope", "https://a.example/feed"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_register_keeps_existing_sort_order() {
        let (registry, store) = create_test_registry();
        let home = Channel { uid: "home".into(), name: "Home".into(), unread: 0 };
        registry.register(&home).unwrap();
        store.atomic(|tx| tx.set("channel_sortorder_home", "5")).unwrap();
        registry.register(&home).unwrap();

        let order = store.atomic(|tx| tx.get("channel_sortorder_home")).unwrap();
        assert_eq!(order.as_deref(), Some("5"));
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_set_next_uid_only_raises() {
        let (registry, _store) = create_test_registry();
        registry.set_next_uid(2_000_000).unwrap();
        registry.set_next_uid(1_500_000).unwrap();
        assert_eq!(registry.create("x").unwrap().uid, "2000000");
    }
}
