//! The bootstrap file: channels, feeds and the uid counter, persisted as
//! pretty-printed JSON between runs.

use crate::channels::{ChannelRegistry, FIRST_UID, NOTIFICATIONS};
use crate::error::{Error, Result};
use crate::models::{Channel, FeedMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

fn first_uid() -> i64 {
    FIRST_UID
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(default)]
    pub channels: BTreeMap<String, Channel>,
    #[serde(default)]
    pub feeds: FeedMap,
    #[serde(default = "first_uid")]
    pub next_uid: i64,
    #[serde(default)]
    pub me: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sort_order: BTreeMap<String, i64>,
}

impl Snapshot {
    /// The snapshot a fresh installation starts from.
    pub fn bootstrap() -> Self {
        let channels = [(NOTIFICATIONS, "Notifications"), ("home", "Home")]
            .into_iter()
            .map(|(uid, name)| {
                let channel = Channel {
                    uid: uid.to_string(),
                    name: name.to_string(),
                    unread: 0,
                };
                (uid.to_string(), channel)
            })
            .collect();
        Self {
            channels,
            feeds: FeedMap::new(),
            next_uid: FIRST_UID,
            me: "https://example.com/".to_string(),
            token_endpoint: String::new(),
            sort_order: BTreeMap::new(),
        }
    }

    /// Reads a snapshot; a missing file is [`Error::ConfigMissing`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ConfigMissing { path: path.to_path_buf() })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("saved snapshot to {}", path.display());
        Ok(())
    }

    /// Loads every channel and feed into the registry. Sort orders already
    /// in the store win; the uid counter is only ever raised.
    pub fn reconcile(&self, registry: &ChannelRegistry) -> Result<()> {
        for channel in self.channels.values() {
            info!("loading channel {} - {}", channel.uid, channel.name);
            if let Some(order) = self.sort_order.get(&channel.uid) {
                registry.seed_sort_order(&channel.uid, *order)?;
            }
            registry.register(channel)?;
        }
        for (uid, feeds) in &self.feeds {
            if !self.channels.contains_key(uid) {
                warn!("snapshot lists feeds for unknown channel {}", uid);
                continue;
            }
            for feed in feeds {
                registry.follow(uid, &feed.url)?;
            }
        }
        registry.set_next_uid(self.next_uid)
    }

    /// Reads the registry back into a snapshot suitable for [`Snapshot::save`].
    /// Sort orders are stored as list positions, so ties are resolved once.
    pub fn capture(registry: &ChannelRegistry, me: &str, token_endpoint: &str) -> Result<Self> {
        let mut channels = BTreeMap::new();
        let mut feeds = FeedMap::new();
        let mut sort_order = BTreeMap::new();
        for (rank, channel) in registry.list()?.into_iter().enumerate() {
            sort_order.insert(channel.uid.clone(), rank as i64 + 1);
            let followed = registry.feeds(&channel.uid)?;
            if !followed.is_empty() {
                feeds.insert(channel.uid.clone(), followed);
            }
            channels.insert(channel.uid.clone(), channel);
        }
        Ok(Self {
            channels,
            feeds,
            next_uid: registry.next_uid()?,
            me: me.to_string(),
            token_endpoint: token_endpoint.to_string(),
            sort_order,
        })
    }
}
