pub mod channels;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod formats;
pub mod kv;
pub mod logging;
pub mod microformats;
pub mod models;
pub mod normalize;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod timeline;

pub use channels::ChannelRegistry;
pub use error::{Error, Result};
pub use fetcher::{Fetch, FetchConfig, FetchResponse, HttpFetcher};
pub use kv::{KeyValueStore, MemoryStore, StoreExt};
pub use models::{Card, Channel, Content, Feed, Item, Pagination, Timeline};
pub use scheduler::{Scheduler, SchedulerHandle, SweepReport};
pub use service::Microsub;
pub use snapshot::Snapshot;
pub use timeline::TimelineStore;
