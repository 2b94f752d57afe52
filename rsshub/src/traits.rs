use crate::types::{Feed, FetchedChannel, NewArticle, Result};
use async_trait::async_trait;
use uuid::Uuid;

/// Durable store for feeds and articles, as seen by the aggregator core.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Look up a feed by id. `None` if it was deleted.
    async fn get_feed(&self, id: Uuid) -> Result<Option<Feed>>;

    /// Up to `limit` feeds ordered by ascending `updated_at` (stalest first).
    async fn get_outdated_feeds(&self, limit: usize) -> Result<Vec<Feed>>;

    /// Mark a feed as freshly processed.
    async fn update_feed_timestamp(&self, id: Uuid) -> Result<()>;

    /// Insert an article. Idempotent on `link`: returns `false` when an
    /// article with the same link already exists.
    async fn add_article(&self, article: &NewArticle) -> Result<bool>;
}

/// Retrieves and parses a feed document.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedChannel>;
}
