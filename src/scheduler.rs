//! Periodic ingestion: every feed of every channel, fetched and appended.

use crate::channels::ChannelRegistry;
use crate::error::Result;
use crate::fetcher::{Fetch, FetchResponse};
use crate::formats;
use crate::timeline::TimelineStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Parses a fetched document and appends its items to the channel.
/// Returns how many items were new to the channel; nothing is written once
/// the channel has been deleted.
pub fn ingest(timeline: &TimelineStore, channel: &str, url: &str, response: &FetchResponse) -> Result<usize> {
    let items = formats::parse_entries(url, &response.content_type, &response.body)?;
    let mut appended = 0;
    for item in &items {
        if timeline.append_if_registered(channel, item)? {
            appended += 1;
        }
    }
    debug!("{}: {} of {} items new in {}", url, appended, items.len(), channel);
    Ok(appended)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Feeds attempted.
    pub feeds: usize,
    pub failed: usize,
    pub appended: usize,
}

pub struct Scheduler {
    registry: ChannelRegistry,
    timeline: TimelineStore,
    fetcher: Arc<dyn Fetch>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        registry: ChannelRegistry,
        timeline: TimelineStore,
        fetcher: Arc<dyn Fetch>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            timeline,
            fetcher,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// One pass over every followed feed. Failures are logged and counted,
    /// never returned. Stops early once cancelled.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let channels = match self.registry.list() {
            Ok(channels) => channels,
            Err(e) => {
                warn!("cannot list channels: {}", e);
                return report;
            }
        };

        for channel in channels {
            let feeds = match self.registry.feeds(&channel.uid) {
                Ok(feeds) => feeds,
                Err(e) => {
                    warn!("cannot list feeds of {}: {}", channel.uid, e);
                    continue;
                }
            };

            for feed in feeds {
                if self.cancel.is_cancelled() {
                    info!("sweep cancelled");
                    return report;
                }
                report.feeds += 1;

                let fetched = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("sweep cancelled while fetching {}", feed.url);
                        return report;
                    }
                    fetched = self.fetcher.fetch(&feed.url) => fetched,
                };

                match fetched.and_then(|response| ingest(&self.timeline, &channel.uid, &feed.url, &response)) {
                    Ok(n) => report.appended += n,
                    Err(e) => {
                        warn!("skipping {} in {}: {}", feed.url, channel.uid, e);
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Runs [`Scheduler::sweep`] every interval until shut down. The first
    /// sweep happens one interval after spawning.
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("scheduler started, sweeping every {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        info!(
                            "sweep done: {} feeds, {} failed, {} new items",
                            report.feeds, report.failed, report.appended
                        );
                    }
                }
            }
            info!("scheduler stopped");
        });
        SchedulerHandle { cancel, task }
    }
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancels the loop, abandoning any fetch in flight, and waits for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("scheduler task ended abnormally: {}", e);
        }
    }
}
