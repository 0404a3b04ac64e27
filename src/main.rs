use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use subreader::fetcher::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use subreader::{
    config, logging, Error, Fetch, FetchConfig, HttpFetcher, KeyValueStore, MemoryStore, Microsub,
    Scheduler, Snapshot,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "subreader")]
#[command(about = "Microsub-style feed reader backend", long_about = None)]
struct Cli {
    /// Snapshot file (defaults to $SUBREADER_SNAPSHOT, then $XDG_CONFIG_HOME/subreader/backend.json)
    #[arg(long, global = true)]
    snapshot: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh snapshot with the default channels
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Sweep feeds periodically until interrupted
    Serve {
        #[arg(short, long, default_value_t = 600)]
        interval_secs: u64,
    },
    /// Sweep every feed once and report
    Fetch,
    Channels {
        #[command(subcommand)]
        action: Option<ChannelAction>,
    },
    /// Follow a feed URL in a channel
    Follow { channel: String, url: String },
    Unfollow { channel: String, url: String },
    /// Fetch, then print one page of a channel as JSON
    Timeline {
        channel: String,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        after: Option<String>,
    },
    /// Print the items a URL would contribute, without following it
    Preview { url: String },
    /// Look for feeds on a site
    Search { query: String },
}

#[derive(Subcommand)]
enum ChannelAction {
    List,
    Create { name: String },
    Update { uid: String, name: String },
    Delete { uid: String },
    /// Reorder channels; `notifications` always stays first
    Order { uids: Vec<String> },
}

struct Backend {
    microsub: Microsub,
    fetcher: Arc<dyn Fetch>,
    snapshot: Snapshot,
    path: PathBuf,
}

impl Backend {
    fn open(path: PathBuf, fetch: &FetchConfig) -> Result<Self> {
        let snapshot = Snapshot::load(&path).map_err(|e| match e {
            Error::ConfigMissing { .. } => {
                anyhow::anyhow!("{}; run `subreader init` to create one", e)
            }
            other => anyhow::Error::new(other),
        })?;
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(fetch)?);
        let microsub = Microsub::new(store, fetcher.clone());
        snapshot
            .reconcile(microsub.registry())
            .context("loading snapshot into the store")?;
        info!("loaded {} channels from {}", snapshot.channels.len(), path.display());
        Ok(Self {
            microsub,
            fetcher,
            snapshot,
            path,
        })
    }

    fn scheduler(&self, interval: Duration) -> Scheduler {
        Scheduler::new(
            self.microsub.registry().clone(),
            self.microsub.timeline().clone(),
            self.fetcher.clone(),
            interval,
        )
    }

    fn save(&self) -> Result<()> {
        let captured = Snapshot::capture(
            self.microsub.registry(),
            &self.snapshot.me,
            &self.snapshot.token_endpoint,
        )?;
        captured
            .save(&self.path)
            .with_context(|| format!("saving {}", self.path.display()))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    Snapshot::bootstrap().save(path)?;
    println!("Created {}", path.display());
    println!("Set \"Me\" to your website address.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let path = config::snapshot_path_from_env(cli.snapshot.as_deref());
    let fetch = FetchConfig {
        user_agent: cli.user_agent,
        timeout_secs: cli.timeout_secs,
    };

    match cli.command {
        Commands::Init { force } => init(&path, force)?,
        Commands::Serve { interval_secs } => {
            let backend = Backend::open(path, &fetch)?;
            let scheduler = backend.scheduler(Duration::from_secs(interval_secs));
            let report = scheduler.sweep().await;
            info!("initial sweep: {} feeds, {} new items", report.feeds, report.appended);

            let handle = scheduler.spawn();
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down");
            handle.shutdown().await;
            backend.save()?;
        }
        Commands::Fetch => {
            let backend = Backend::open(path, &fetch)?;
            let report = backend.scheduler(Duration::ZERO).sweep().await;
            println!(
                "Fetched {} feeds ({} failed), {} new items",
                report.feeds, report.failed, report.appended
            );
            for channel in backend.microsub.channels_get_list()? {
                println!("  {:<16} {:<24} {} unread", channel.uid, channel.name, channel.unread);
            }
        }
        Commands::Channels { action } => {
            let backend = Backend::open(path, &fetch)?;
            let microsub = &backend.microsub;
            match action.unwrap_or(ChannelAction::List) {
                ChannelAction::List => {
                    for channel in microsub.channels_get_list()? {
                        let feeds = microsub.follow_get_list(&channel.uid)?;
                        println!("{:<16} {:<24} {} feeds", channel.uid, channel.name, feeds.len());
                    }
                    return Ok(());
                }
                ChannelAction::Create { name } => {
                    let channel = microsub.channels_create(&name)?;
                    println!("Created {} ({})", channel.uid, channel.name);
                }
                ChannelAction::Update { uid, name } => {
                    microsub.channels_update(&uid, &name)?;
                    println!("Renamed {} to {}", uid, name);
                }
                ChannelAction::Delete { uid } => {
                    microsub.channels_delete(&uid)?;
                    println!("Deleted {}", uid);
                }
                ChannelAction::Order { uids } => {
                    microsub.channels_order(&uids)?;
                }
            }
            backend.save()?;
        }
        Commands::Follow { channel, url } => {
            let backend = Backend::open(path, &fetch)?;
            let feed = backend.microsub.follow_url(&channel, &url).await?;
            println!("Following {} in {}", feed.url, channel);
            backend.save()?;
        }
        Commands::Unfollow { channel, url } => {
            let backend = Backend::open(path, &fetch)?;
            backend.microsub.unfollow_url(&channel, &url)?;
            backend.save()?;
        }
        Commands::Timeline { channel, before, after } => {
            let backend = Backend::open(path, &fetch)?;
            backend.scheduler(Duration::ZERO).sweep().await;
            let page = backend
                .microsub
                .timeline_get(before.as_deref(), after.as_deref(), &channel)?;
            print_json(&page)?;
        }
        Commands::Preview { url } => {
            let fetcher = HttpFetcher::new(&fetch)?;
            let microsub = Microsub::new(Arc::new(MemoryStore::new()), Arc::new(fetcher));
            print_json(&microsub.preview_url(&url).await?)?;
        }
        Commands::Search { query } => {
            let fetcher = HttpFetcher::new(&fetch)?;
            let microsub = Microsub::new(Arc::new(MemoryStore::new()), Arc::new(fetcher));
            let feeds = microsub.search(&query).await?;
            if feeds.is_empty() {
                println!("No feeds found for {}", query);
            } else {
                print_json(&feeds)?;
            }
        }
    }

    Ok(())
}
