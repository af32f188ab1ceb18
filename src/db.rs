use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{Sqlite, SqlitePoolOptions},
    FromRow, QueryBuilder, SqlitePool,
};

use crate::config::FeedConfig;
use crate::normalizer::NormalizedArticle;

/// Category value the frontend sends to mean "no category filter"
pub const ALL_CATEGORIES: &str = "Tümü";
const SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: String,
    pub language: String,
    pub is_active: bool,
    /// Last fetch attempt, successful or not
    pub last_fetched: Option<String>,
    pub last_success: Option<String>,
    /// Consecutive failed fetches, reset on success
    pub error_count: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub category: String,
    pub source: String,
    pub published_at: String,
    pub reading_time_seconds: i64,
    pub view_count: i64,
    /// Number of ingestion cycles that have seen this URL
    pub seen_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Storage for normalized articles, keyed by canonical URL.
///
/// Concurrent calls for the same key are last-write-wins; the creation record
/// of an existing article is never replaced.
#[async_trait]
pub trait ArticleRepository: Send + Sync {
    async fn upsert_by_key(&self, article: &NormalizedArticle) -> anyhow::Result<UpsertOutcome>;
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category: Option<String>,
    pub source: Option<String>,
    /// Matched against title and summary
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Matched against title, summary and content
    pub query: Option<String>,
    pub category: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Partial feed edit; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub feeds: i64,
    pub active_feeds: i64,
    pub total_articles: i64,
    pub recent_articles: i64,
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn push_article_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ArticleFilter) {
    if let Some(category) = non_empty(&filter.category).filter(|c| *c != ALL_CATEGORIES) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(source) = non_empty(&filter.source) {
        qb.push(" AND source = ").push_bind(source.to_string());
    }
    if let Some(search) = non_empty(&filter.search) {
        let pattern = format!("%{}%", search);
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR summary LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT 'tr',
                is_active INTEGER NOT NULL DEFAULT 1,
                last_fetched TEXT,
                last_success TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                summary TEXT,
                content TEXT,
                image_url TEXT,
                category TEXT NOT NULL,
                source TEXT NOT NULL,
                published_at TEXT NOT NULL,
                reading_time_seconds INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                seen_count INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category)",
            "CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub async fn sync_feeds(&self, configs: &[FeedConfig]) -> anyhow::Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO feeds (name, url, category, language, is_active)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category,
                    language = excluded.language,
                    is_active = excluded.is_active
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .bind(&config.category)
            .bind(&config.language)
            .bind(config.is_active)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_active_feeds(&self) -> anyhow::Result<Vec<FeedSource>> {
        let feeds =
            sqlx::query_as::<_, FeedSource>("SELECT * FROM feeds WHERE is_active = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(feeds)
    }

    pub async fn list_feeds(&self, include_inactive: bool) -> anyhow::Result<Vec<FeedSource>> {
        let sql = if include_inactive {
            "SELECT * FROM feeds ORDER BY name ASC"
        } else {
            "SELECT * FROM feeds WHERE is_active = 1 ORDER BY name ASC"
        };
        let feeds = sqlx::query_as::<_, FeedSource>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<FeedSource>> {
        let feed = sqlx::query_as::<_, FeedSource>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Fails with a unique violation when the URL is already registered
    pub async fn create_feed(&self, config: &FeedConfig) -> anyhow::Result<FeedSource> {
        let feed = sqlx::query_as::<_, FeedSource>(
            r#"
            INSERT INTO feeds (name, url, category, language, is_active)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&config.name)
        .bind(&config.url)
        .bind(&config.category)
        .bind(&config.language)
        .bind(config.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn update_feed(
        &self,
        feed_id: i64,
        update: &FeedUpdate,
    ) -> anyhow::Result<Option<FeedSource>> {
        let feed = sqlx::query_as::<_, FeedSource>(
            r#"
            UPDATE feeds SET
                name = COALESCE(?, name),
                url = COALESCE(?, url),
                category = COALESCE(?, category),
                language = COALESCE(?, language),
                is_active = COALESCE(?, is_active)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&update.name)
        .bind(&update.url)
        .bind(&update.category)
        .bind(&update.language)
        .bind(update.is_active)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Removes the feed together with its articles. Returns false if no such feed.
    pub async fn delete_feed(&self, feed_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn record_fetch_success(&self, feed_id: i64) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched = ?, last_success = ?, error_count = 0, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_fetch_failure(&self, feed_id: i64, error: &str) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched = ?, error_count = error_count + 1, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(error)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_articles(
        &self,
        filter: &ArticleFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Article>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE 1 = 1");
        push_article_filter(&mut qb, filter);
        qb.push(" ORDER BY published_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let articles = qb
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    pub async fn count_articles(&self, filter: &ArticleFilter) -> anyhow::Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles WHERE 1 = 1");
        push_article_filter(&mut qb, filter);

        let count = qb
            .build_query_as::<(i64,)>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn search_articles(&self, filter: &SearchFilter) -> anyhow::Result<Vec<Article>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE 1 = 1");

        if let Some(query) = non_empty(&filter.query) {
            let pattern = format!("%{}%", query);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR summary LIKE ")
                .push_bind(pattern.clone())
                .push(" OR content LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(category) = non_empty(&filter.category) {
            qb.push(" AND category = ").push_bind(category.to_string());
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND published_at >= ").push_bind(timestamp(from));
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND published_at <= ").push_bind(timestamp(to));
        }
        qb.push(" ORDER BY published_at DESC, id DESC LIMIT ")
            .push_bind(SEARCH_LIMIT);

        let articles = qb
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    pub async fn get_article_by_url(&self, url: &str) -> anyhow::Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    /// Fetch an article for display, counting the view
    pub async fn view_article(&self, article_id: i64) -> anyhow::Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(
            "UPDATE articles SET view_count = view_count + 1 WHERE id = ? RETURNING *",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        let (feeds,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(&self.pool)
            .await?;
        let (active_feeds,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM feeds WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;
        let (total_articles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        let since = timestamp(Utc::now() - Duration::hours(24));
        let (recent_articles,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE created_at >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        Ok(Stats {
            feeds,
            active_feeds,
            total_articles,
            recent_articles,
        })
    }
}

#[async_trait]
impl ArticleRepository for Database {
    async fn upsert_by_key(&self, article: &NormalizedArticle) -> anyhow::Result<UpsertOutcome> {
        let now = timestamp(Utc::now());

        let (seen_count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO articles (
                feed_id, title, url, summary, content, image_url, category, source,
                published_at, reading_time_seconds, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                summary = excluded.summary,
                content = excluded.content,
                image_url = excluded.image_url,
                category = excluded.category,
                reading_time_seconds = excluded.reading_time_seconds,
                updated_at = excluded.updated_at,
                seen_count = articles.seen_count + 1
            RETURNING seen_count
            "#,
        )
        .bind(article.feed_id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.summary)
        .bind(&article.content)
        .bind(&article.image_url)
        .bind(&article.category)
        .bind(&article.source)
        .bind(timestamp(article.published_at))
        .bind(article.reading_time_seconds)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        if seen_count == 1 {
            Ok(UpsertOutcome::Created)
        } else {
            Ok(UpsertOutcome::Updated)
        }
    }
}
