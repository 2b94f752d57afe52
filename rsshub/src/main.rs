use anyhow::Context;
use clap::{Parser, Subcommand};
use rsshub::config::parse_duration;
use rsshub::control::{self, StateStore};
use rsshub::parser::channel_summary;
use rsshub::{Config, FeedFetcher, HttpFetcher, PgRepository, RssAggregator};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rsshub", version, about = "Background RSS aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the aggregator and run until terminated.
    Fetch {
        /// Poll interval, e.g. `30s`, `3m`, `1h30m` (else RSSHUB_INTERVAL).
        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,

        /// Number of concurrent workers (else RSSHUB_WORKERS).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Change the poll interval of the running aggregator.
    SetInterval {
        #[arg(long, value_parser = parse_duration)]
        duration: Duration,
    },

    /// Change the worker count of the running aggregator.
    SetWorkers {
        #[arg(long)]
        count: usize,
    },

    /// Ask the running aggregator to shut down.
    Stop,

    /// Print the recorded aggregator state.
    Status,

    /// Register a feed.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
    },

    /// List registered feeds, newest first.
    List {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Remove a feed and its articles.
    Delete {
        #[arg(long)]
        name: String,
    },

    /// Fetch a feed once and print its channel and first items.
    Url {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "5")]
        num: usize,
    },

    /// Show the latest articles of a feed.
    Articles {
        #[arg(long)]
        feed_name: String,
        #[arg(long, default_value = "3")]
        num: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rsshub=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let store = StateStore::new(&config.state_path);

    match cli.command {
        Commands::Fetch { interval, workers } => run(config, store, interval, workers).await?,
        Commands::SetInterval { duration } => {
            let state = control::request_interval(&store, duration)?;
            println!("Interval set to {:?} (pid {})", state.interval, state.pid);
        }
        Commands::SetWorkers { count } => {
            let state = control::request_workers(&store, count)?;
            println!("Worker count set to {} (pid {})", state.worker_count, state.pid);
        }
        Commands::Stop => {
            let state = control::request_stop(&store)?;
            println!("Stop requested (pid {})", state.pid);
        }
        Commands::Status => {
            let state = store.load()?;
            if state.running {
                println!(
                    "running: pid {}, interval {:?}, workers {}",
                    state.pid, state.interval, state.worker_count
                );
            } else {
                println!("not running");
            }
        }
        Commands::Add { name, url } => {
            let repo = connect(&config).await?;
            let feed = repo.add_feed(&name, &url).await?;
            println!("Added feed {} ({})", feed.name, feed.url);
        }
        Commands::List { limit } => {
            let repo = connect(&config).await?;
            for (i, feed) in repo.list_feeds(limit).await?.iter().enumerate() {
                println!(
                    "{}. {} - {} (added {})",
                    i + 1,
                    feed.name,
                    feed.url,
                    feed.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Delete { name } => {
            let repo = connect(&config).await?;
            repo.delete_feed(&name).await?;
            println!("Deleted feed {}", name);
        }
        Commands::Url { url, num } => {
            let fetcher = HttpFetcher::new(config.fetch.clone())?;
            let channel = fetcher.fetch(&url).await.context("Failed to fetch feed")?;
            print!("{}", channel_summary(&channel, num));
        }
        Commands::Articles { feed_name, num } => {
            let repo = connect(&config).await?;
            for article in repo.articles_by_feed(&feed_name, num).await? {
                println!(
                    "[{}] {}\n    {}",
                    article.published_at.format("%Y-%m-%d %H:%M"),
                    article.title,
                    article.link
                );
            }
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgRepository> {
    info!("Connecting to database: {}", config.redacted_database_url());
    PgRepository::connect(&config.database_url, config.database_pool_size)
        .await
        .context("Failed to connect to database")
}

async fn run(
    mut config: Config,
    store: StateStore,
    interval: Option<Duration>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(interval) = interval {
        config.interval = interval;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate()?;

    control::ensure_not_running(&store)?;

    let repo = Arc::new(connect(&config).await?);
    let fetcher = Arc::new(HttpFetcher::new(config.fetch.clone())?);
    let aggregator = RssAggregator::new(repo, fetcher, config.settings())?;

    // Handlers go in before the state file names this process as running.
    let events = control::listen_for_signals()?;

    aggregator.start().await?;
    if let Err(e) = store.save(&aggregator.state().await) {
        aggregator.stop().await?;
        return Err(e).context("Failed to write state file");
    }

    info!(
        "Aggregator running (pid {}); state at {}",
        std::process::id(),
        store.path().display()
    );

    control::serve(aggregator, store, events).await?;
    info!("Shutdown complete");
    Ok(())
}
