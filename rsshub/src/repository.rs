use crate::traits::Repository;
use crate::types::{AggregatorError, Article, Feed, NewArticle, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const FEED_COLUMNS: &str = "id, name, url, created_at, updated_at";

/// Postgres-backed [`Repository`]. Expects the schema in `migrations/`
/// (`sqlx migrate run`).
pub struct PgRepository {
    db: PgPool,
}

impl PgRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    /// Register a new feed. It starts maximally stale so the next dispatch
    /// cycle picks it up.
    pub async fn add_feed(&self, name: &str, url: &str) -> Result<Feed> {
        validate_feed_url(url)?;

        let feed = sqlx::query_as::<_, Feed>(&format!(
            r#"
            INSERT INTO feeds (id, name, url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FEED_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(url)
        .bind(Utc::now())
        .bind(DateTime::<Utc>::UNIX_EPOCH)
        .fetch_one(&self.db)
        .await?;

        info!("Added new feed: {} ({}) with ID: {}", feed.name, feed.url, feed.id);
        Ok(feed)
    }

    pub async fn list_feeds(&self, limit: usize) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(feeds)
    }

    pub async fn delete_feed(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM feeds WHERE name = $1")
            .bind(name)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AggregatorError::FeedNotFound { name: name.to_string() });
        }
        info!("Deleted feed: {}", name);
        Ok(())
    }

    /// Latest articles of a feed, matched case-insensitively by feed name.
    pub async fn articles_by_feed(&self, feed_name: &str, limit: usize) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT a.id, a.feed_id, a.title, a.link, a.description, a.published_at, a.created_at
            FROM articles a
            JOIN feeds f ON a.feed_id = f.id
            WHERE LOWER(f.name) = LOWER($1)
            ORDER BY a.published_at DESC
            LIMIT $2
            "#,
        )
        .bind(feed_name)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(articles)
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_feed(&self, id: Uuid) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(feed)
    }

    async fn get_outdated_feeds(&self, limit: usize) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY updated_at ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(feeds)
    }

    async fn update_feed_timestamp(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE feeds SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn add_article(&self, article: &NewArticle) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles (id, feed_id, title, link, description, published_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (link) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(article.feed_id)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.description)
        .bind(article.published_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("Article already stored: {}", article.link);
        }
        Ok(inserted)
    }
}

fn validate_feed_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
        return Err(AggregatorError::Validation(format!(
            "feed URL must be an http(s) URL with a host: {}",
            url
        )));
    }
    Ok(())
}
