use crate::channels;
use crate::error::{Error, Result};
use crate::kv::{KeyValueStore, Score, StoreExt, Txn};
use crate::models::{Item, Pagination, Timeline};
use chrono::Utc;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Global insertion counter; breaks ties between items published in the
/// same millisecond, across all channels.
const SEQUENCE_KEY: &str = "timeline:seq";

fn posts_key(channel: &str) -> String {
    format!("timeline:{}:posts", channel)
}

fn unread_key(channel: &str) -> String {
    format!("timeline:{}:unread", channel)
}

fn read_key(channel: &str) -> String {
    format!("timeline:{}:read", channel)
}

pub(crate) fn counter_key(channel: &str) -> String {
    format!("channel:{}:unread", channel)
}

fn item_key(id: &str) -> String {
    format!("item:{}", id)
}

/// Drops a channel's ordered ids, read markers and unread counter. Item
/// payloads stay, since other channels may share them.
pub(crate) fn drop_channel_timeline(tx: &mut dyn Txn, channel: &str) -> Result<()> {
    tx.del(&posts_key(channel))?;
    tx.del(&unread_key(channel))?;
    tx.del(&read_key(channel))?;
    tx.del(&counter_key(channel))?;
    Ok(())
}

pub(crate) fn read_counter(tx: &dyn Txn, key: &str) -> Result<u64> {
    match tx.get(key)? {
        None => Ok(0),
        Some(raw) => raw
            .parse::<i64>()
            .map(|n| n.max(0) as u64)
            .map_err(|_| Error::StoreUnavailable(format!("unread counter {} holds {:?}", key, raw))),
    }
}

/// Parses a cursor; an absent or empty cursor is an open bound.
fn cursor(raw: Option<&str>) -> Result<Bound<Score>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Bound::Unbounded),
        Some(s) => Ok(Bound::Excluded(s.parse()?)),
    }
}

/// One fetched position: id, score, raw payload, read flag.
type Slot = (String, Score, Option<String>, bool);

/// Per-channel ordered timelines with read tracking.
///
/// Item payloads are stored once under `item:{id}` and shared by every
/// channel that references them; the channel only holds ordered ids.
#[derive(Clone)]
pub struct TimelineStore {
    store: Arc<dyn KeyValueStore>,
}

impl TimelineStore {
    /// Wraps a shared store handle.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Adds an item to a channel. Returns `false` when the channel already
    /// holds an item with the same id.
    pub fn append(&self, channel: &str, item: &Item) -> Result<bool> {
        self.insert(channel, item, false)
    }

    /// Like [`TimelineStore::append`], but only while `channel` is still a
    /// registered channel. Returns `false` once the channel has been deleted,
    /// so a sweep racing a delete cannot bring its timeline back.
    pub fn append_if_registered(&self, channel: &str, item: &Item) -> Result<bool> {
        self.insert(channel, item, true)
    }

    fn insert(&self, channel: &str, item: &Item, registered_only: bool) -> Result<bool> {
        if item.id.is_empty() {
            return Err(Error::malformed(
                item.url.clone().unwrap_or_default(),
                "item has no _id",
            ));
        }

        let mut stored = item.clone();
        stored.read = false;
        let payload = serde_json::to_string(&stored)?;
        let millis = item
            .published_at()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let posts = posts_key(channel);
        let added = self.store.atomic(|tx| {
            if registered_only && !channels::is_channel(tx, channel)? {
                debug!("{} is not a channel, dropping {}", channel, item.id);
                return Ok(false);
            }
            if tx.zscore(&posts, &item.id)?.is_some() {
                return Ok(false);
            }
            let seq = tx.incr(SEQUENCE_KEY, 1)?;
            let score = Score::new(millis, seq as u64);

            tx.hsetnx(&item_key(&item.id), "data", &payload)?;
            tx.zadd(&posts, &item.id, score)?;
            if !tx.sismember(&read_key(channel), &item.id)? {
                tx.zadd(&unread_key(channel), &item.id, score)?;
                tx.incr(&counter_key(channel), 1)?;
            }
            Ok(true)
        })?;

        if added {
            debug!("appended {} to {}", item.id, channel);
        }
        Ok(added)
    }

    /// A newest-first window of the channel strictly between `after` and
    /// `before`.
    ///
    /// With only `after` given, the window is the `limit` items just newer
    /// than `after`, so paging towards the present never skips items.
    pub fn page(
        &self,
        channel: &str,
        before: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Timeline> {
        let max = cursor(before)?;
        let min = cursor(after)?;
        let posts = posts_key(channel);
        let read = read_key(channel);

        let slots: Vec<Slot> = self.store.atomic(|tx| {
            let positions = match (min, max) {
                (Bound::Excluded(_), Bound::Unbounded) => {
                    let mut asc = tx.zrange_by_score(&posts, min, max, Some(limit), false)?;
                    asc.reverse();
                    asc
                }
                _ => tx.zrange_by_score(&posts, min, max, Some(limit), true)?,
            };
            positions
                .into_iter()
                .map(|(id, score)| -> Result<Slot> {
                    let payload = tx.hget(&item_key(&id), "data")?;
                    let is_read = tx.sismember(&read, &id)?;
                    Ok((id, score, payload, is_read))
                })
                .collect()
        })?;

        let paging = match (slots.first(), slots.last()) {
            (Some(newest), Some(oldest)) => Pagination {
                before: newest.1.to_string(),
                after: oldest.1.to_string(),
            },
            _ => Pagination::default(),
        };

        let mut items = Vec::with_capacity(slots.len());
        for (id, _, payload, is_read) in slots {
            let Some(payload) = payload else {
                warn!("item {} in {} has no payload, skipping", id, channel);
                continue;
            };
            match serde_json::from_str::<Item>(&payload) {
                Ok(mut item) => {
                    item.read = is_read;
                    items.push(item);
                }
                Err(e) => warn!("corrupt payload for item {} in {}: {}", id, channel, e),
            }
        }

        Ok(Timeline { items, paging })
    }

    /// Marks items read. Returns how many were unread before the call.
    pub fn mark_read(&self, channel: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let counter = counter_key(channel);
        self.store.atomic(|tx| {
            tx.sadd(&read_key(channel), ids)?;
            let removed = tx.zrem(&unread_key(channel), ids)?;
            let left = read_counter(tx, &counter)?.saturating_sub(removed as u64);
            tx.set(&counter, &left.to_string())?;
            Ok(removed)
        })
    }

    /// Puts read items back into the unread set. Ids the channel never
    /// received are ignored. Returns how many became unread.
    pub fn mark_unread(&self, channel: &str, ids: &[String]) -> Result<usize> {
        let posts = posts_key(channel);
        let unread = unread_key(channel);
        let counter = counter_key(channel);
        self.store.atomic(|tx| {
            let mut restored = 0;
            for id in ids {
                let Some(score) = tx.zscore(&posts, id)? else {
                    continue;
                };
                tx.srem(&read_key(channel), std::slice::from_ref(id))?;
                if tx.zadd(&unread, id, score)? {
                    restored += 1;
                }
            }
            if restored > 0 {
                let count = read_counter(tx, &counter)? + restored as u64;
                tx.set(&counter, &count.to_string())?;
            }
            Ok(restored)
        })
    }

    /// The channel's unread counter; zero for a channel never written to.
    pub fn unread_count(&self, channel: &str) -> Result<u64> {
        let counter = counter_key(channel);
        self.store.atomic(|tx| read_counter(tx, &counter))
    }

    /// Looks an item up by id, whether or not any channel still lists it.
    pub fn item(&self, id: &str) -> Result<Option<Item>> {
        let payload = self.store.atomic(|tx| tx.hget(&item_key(id), "data"))?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(Error::from))
            .transpose()
    }
}

#[cfg(test)]
#[path = "timeline_tests.rs"]
mod tests;
