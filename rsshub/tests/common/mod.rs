#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsshub::{
    AggregatorError, Article, Feed, FeedFetcher, FetchedChannel, FetchedItem, NewArticle,
    Repository, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `limit` elapses. Works under paused time.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

#[derive(Default)]
struct Tables {
    feeds: Vec<Feed>,
    articles: Vec<Article>,
}

/// In-memory store with the same link uniqueness as the Postgres schema.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_feed(&self, name: &str, url: &str) -> Feed {
        let feed = Feed {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        self.tables.lock().unwrap().feeds.push(feed.clone());
        feed
    }

    pub fn remove_feed(&self, id: Uuid) {
        let mut tables = self.tables.lock().unwrap();
        tables.feeds.retain(|f| f.id != id);
        tables.articles.retain(|a| a.feed_id != id);
    }

    pub fn feed(&self, id: Uuid) -> Option<Feed> {
        self.tables.lock().unwrap().feeds.iter().find(|f| f.id == id).cloned()
    }

    pub fn articles(&self) -> Vec<Article> {
        self.tables.lock().unwrap().articles.clone()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_feed(&self, id: Uuid) -> Result<Option<Feed>> {
        Ok(self.feed(id))
    }

    async fn get_outdated_feeds(&self, limit: usize) -> Result<Vec<Feed>> {
        let mut feeds = self.tables.lock().unwrap().feeds.clone();
        feeds.sort_by_key(|f| f.updated_at);
        feeds.truncate(limit);
        Ok(feeds)
    }

    async fn update_feed_timestamp(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(feed) = tables.feeds.iter_mut().find(|f| f.id == id) {
            feed.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn add_article(&self, article: &NewArticle) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        if tables.articles.iter().any(|a| a.link == article.link) {
            return Ok(false);
        }
        tables.articles.push(Article {
            id: Uuid::new_v4(),
            feed_id: article.feed_id,
            title: article.title.clone(),
            link: article.link.clone(),
            description: article.description.clone(),
            published_at: article.published_at,
            created_at: Utc::now(),
        });
        Ok(true)
    }
}

/// Serves canned channels by URL; unknown or failing URLs return an error.
#[derive(Default)]
pub struct StaticFetcher {
    channels: Mutex<HashMap<String, FetchedChannel>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, channel: FetchedChannel) {
        self.channels.lock().unwrap().insert(url.to_string(), channel);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedChannel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(url) {
            return Err(AggregatorError::General(format!("unreachable: {url}")));
        }
        self.channels
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AggregatorError::Parse(format!("no channel for {url}")))
    }
}

/// Blocks every fetch until the test hands out permits, recording how many
/// fetches were in flight at once.
pub struct GatedFetcher {
    gate: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl GatedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedChannel> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        permit
            .map_err(|e| AggregatorError::General(e.to_string()))?
            .forget();

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedChannel::default())
    }
}

pub fn item(title: &str, link: &str, pub_date: &str) -> FetchedItem {
    FetchedItem {
        title: title.to_string(),
        link: Some(link.to_string()),
        description: Some(format!("About {title}")),
        pub_date: Some(pub_date.to_string()),
    }
}

pub fn channel(items: Vec<FetchedItem>) -> FetchedChannel {
    FetchedChannel {
        title: Some("Test channel".to_string()),
        description: None,
        link: None,
        items,
    }
}
