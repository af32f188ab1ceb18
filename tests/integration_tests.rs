//! Integration tests for the haber-akisi ingestion pipeline
//!
//! These tests verify the full workflow from configuration loading
//! through fetching, normalization and storage.

use std::io::Write;
use tempfile::NamedTempFile;

mod common {
    use async_trait::async_trait;
    use haber_akisi::config::FeedConfig;
    use haber_akisi::error::TranslationError;
    use haber_akisi::translation::TranslationProvider;
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub fn feed_config(name: &str, url: &str, category: &str, language: &str) -> FeedConfig {
        FeedConfig {
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            language: language.to_string(),
            is_active: true,
        }
    }

    /// Upper-cases its input so translated fields are easy to spot
    pub struct ShoutingProvider;

    #[async_trait]
    impl TranslationProvider for ShoutingProvider {
        async fn translate(&self, text: &str, _: &str) -> Result<String, TranslationError> {
            Ok(text.to_uppercase())
        }
    }
}

#[cfg(test)]
mod config_integration_tests {
    use super::*;
    use haber_akisi::config::Config;

    #[test]
    fn test_load_actual_feeds_config() {
        let config = Config::load("feeds.toml");
        assert!(config.is_ok(), "Failed to load feeds.toml: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.feeds.len(), 14);
        assert!(config.refresh_interval > 0, "refresh_interval should be positive");
        assert_eq!(config.target_language, "tr");

        let bbc = config.feeds.iter().find(|f| f.name == "BBC World").unwrap();
        assert_eq!(bbc.language, "en");
        let aa = config.feeds.iter().find(|f| f.name == "Anadolu Ajansı").unwrap();
        assert_eq!(aa.language, "tr");
        assert!(config.feeds.iter().all(|f| f.is_active));
    }

    #[test]
    fn test_config_from_file() {
        let toml_content = r#"
            refresh_interval = 5
            summary_length = 120

            [[feeds]]
            name = "Yerel Haber"
            url = "https://yerel.example.com/rss"
            category = "Gündem"

            [[feeds]]
            name = "World Desk"
            url = "https://world.example.com/feed"
            category = "Dünya"
            language = "en"
            is_active = false
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.refresh_interval, 5);
        assert_eq!(config.summary_length, 120);
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.feeds.len(), 2);

        assert_eq!(config.feeds[0].language, "tr");
        assert!(config.feeds[0].is_active);

        assert_eq!(config.feeds[1].language, "en");
        assert!(!config.feeds[1].is_active);
    }
}

#[cfg(test)]
mod database_integration_tests {
    use super::common::*;
    use chrono::{Duration, Utc};
    use haber_akisi::db::{ArticleFilter, ArticleRepository, Database, UpsertOutcome};
    use haber_akisi::normalizer::NormalizedArticle;
    use std::sync::Arc;

    fn article(feed_id: i64, i: i64, title: &str) -> NormalizedArticle {
        NormalizedArticle {
            feed_id,
            title: title.to_string(),
            url: format!("https://haber.example.com/{}", i),
            summary: format!("Özet {}", i),
            content: None,
            image_url: None,
            category: "Gündem".to_string(),
            source: "Test Feed".to_string(),
            published_at: Utc::now() - Duration::hours(25 - i),
            reading_time_seconds: 60,
        }
    }

    #[tokio::test]
    async fn test_full_database_workflow() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        let db = Database::new(&db_url).await.unwrap();
        db.initialize().await.unwrap();
        db.sync_feeds(&[feed_config("Test Feed", "https://test.com/rss", "Gündem", "tr")])
            .await
            .unwrap();

        let feeds = db.get_active_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        let feed = &feeds[0];

        for i in 1..=25 {
            let outcome = db
                .upsert_by_key(&article(feed.id, i, &format!("Haber {}", i)))
                .await
                .unwrap();
            assert_eq!(outcome, UpsertOutcome::Created);
        }

        let filter = ArticleFilter::default();
        assert_eq!(db.count_articles(&filter).await.unwrap(), 25);

        let page1 = db.list_articles(&filter, 10, 0).await.unwrap();
        assert_eq!(page1.len(), 10);
        assert_eq!(page1[0].title, "Haber 25"); // Most recent first

        let page3 = db.list_articles(&filter, 10, 20).await.unwrap();
        assert_eq!(page3.len(), 5);

        db.record_fetch_failure(feed.id, "boom").await.unwrap();
        db.record_fetch_success(feed.id).await.unwrap();
        let updated_feed = db.get_feed(feed.id).await.unwrap().unwrap();
        assert!(updated_feed.last_fetched.is_some());
        assert!(updated_feed.last_success.is_some());
        assert_eq!(updated_feed.error_count, 0);
        assert!(updated_feed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        {
            let db = Database::new(&db_url).await.unwrap();
            db.initialize().await.unwrap();
            db.sync_feeds(&[feed_config(
                "Persistent Feed",
                "https://persistent.com/rss",
                "Gündem",
                "tr",
            )])
            .await
            .unwrap();

            let feeds = db.list_feeds(true).await.unwrap();
            db.upsert_by_key(&article(feeds[0].id, 1, "Kalıcı Haber"))
                .await
                .unwrap();
        }

        // Reopen without reinitializing
        {
            let db = Database::new(&db_url).await.unwrap();

            let feeds = db.list_feeds(true).await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].name, "Persistent Feed");

            let stored = db
                .get_article_by_url("https://haber.example.com/1")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.title, "Kalıcı Haber");
        }
    }

    #[tokio::test]
    async fn test_concurrent_upserts_of_one_url() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        let db = Database::new(&db_url).await.unwrap();
        db.initialize().await.unwrap();
        db.sync_feeds(&[feed_config("Concurrent", "https://concurrent.com/rss", "Gündem", "tr")])
            .await
            .unwrap();
        let feed_id = db.list_feeds(true).await.unwrap()[0].id;
        let db = Arc::new(db);

        let handles: Vec<_> = (0..10)
            .map(|n| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.upsert_by_key(&article(feed_id, 1, &format!("Sürüm {}", n)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == UpsertOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(db.count_articles(&ArticleFilter::default()).await.unwrap(), 1);
        let stored = db
            .get_article_by_url("https://haber.example.com/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.seen_count, 10);
        assert!(stored.title.starts_with("Sürüm "));
    }

    #[tokio::test]
    async fn test_feed_update_workflow() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        let db = Database::new(&db_url).await.unwrap();
        db.initialize().await.unwrap();

        db.sync_feeds(&[feed_config("Original Name", "https://feed.example.com/rss", "Gündem", "tr")])
            .await
            .unwrap();

        // Same URL, different properties
        let mut updated = feed_config("Updated Name", "https://feed.example.com/rss", "Spor", "en");
        updated.is_active = false;
        db.sync_feeds(&[updated]).await.unwrap();

        let feeds = db.list_feeds(true).await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].name, "Updated Name");
        assert_eq!(feeds[0].category, "Spor");
        assert_eq!(feeds[0].language, "en");
        assert!(db.get_active_feeds().await.unwrap().is_empty());
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use haber_akisi::db::{ArticleFilter, Database};
    use haber_akisi::fetcher::Fetcher;
    use haber_akisi::ingest::Ingestor;
    use haber_akisi::normalizer::Normalizer;
    use haber_akisi::translation::Translator;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WORLD_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
            <channel>
                <title>World</title>
                <link>https://world.example.com</link>
                <description>World news</description>
                <item>
                    <title>Markets rally</title>
                    <link>https://world.example.com/markets</link>
                    <description><![CDATA[<p>Stocks &amp; bonds rose.</p>]]></description>
                    <pubDate>Tue, 10 Dec 2024 08:00:00 GMT</pubDate>
                    <media:content url="https://img.example.com/markets.jpg" medium="image" />
                </item>
                <item>
                    <title>Storm warning</title>
                    <link>https://world.example.com/storm</link>
                    <description>Heavy rain expected.</description>
                    <pubDate>Tue, 10 Dec 2024 07:00:00 GMT</pubDate>
                    <enclosure url="https://img.example.com/storm.png" type="image/png" length="0" />
                </item>
            </channel>
        </rss>"#;

    const LOCAL_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
            <title>Yerel</title>
            <id>urn:yerel</id>
            <updated>2024-12-10T09:00:00Z</updated>
            <entry>
                <title>Belediye duyurusu</title>
                <id>urn:yerel:1</id>
                <link href="https://yerel.example.com/duyuru"/>
                <updated>2024-12-10T09:00:00Z</updated>
                <summary>Yarın su kesintisi olacak.</summary>
            </entry>
        </feed>"#;

    async fn build_ingestor(db: Arc<Database>) -> Ingestor {
        let translator = Arc::new(Translator::new(Arc::new(ShoutingProvider), 100));
        let normalizer = Normalizer::new(translator, "tr", 300);
        let fetcher = Fetcher::new(Duration::from_secs(2), 10).unwrap();
        Ingestor::new(db, fetcher, normalizer)
    }

    #[tokio::test]
    async fn test_config_to_articles_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/world"))
            .respond_with(ResponseTemplate::new(200).set_body_string(WORLD_RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/yerel"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOCAL_ATOM))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        db.sync_feeds(&[
            feed_config("World Desk", &format!("{}/world", server.uri()), "Dünya", "en"),
            feed_config("Yerel", &format!("{}/yerel", server.uri()), "Gündem", "tr"),
            feed_config("Gone", &format!("{}/gone", server.uri()), "Gündem", "tr"),
        ])
        .await
        .unwrap();
        let db = Arc::new(db);
        let ingestor = build_ingestor(db.clone()).await;

        let report = ingestor.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.created, 3);

        // English source: translated, image from media:content
        let markets = db
            .get_article_by_url("https://world.example.com/markets")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(markets.title, "MARKETS RALLY");
        assert_eq!(markets.summary.as_deref(), Some("STOCKS & BONDS ROSE."));
        assert_eq!(
            markets.image_url.as_deref(),
            Some("https://img.example.com/markets.jpg")
        );
        assert_eq!(markets.category, "Dünya");
        assert_eq!(markets.reading_time_seconds, 60);

        // Image from an enclosure
        let storm = db
            .get_article_by_url("https://world.example.com/storm")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            storm.image_url.as_deref(),
            Some("https://img.example.com/storm.png")
        );

        // Local source: left untranslated
        let local = db
            .get_article_by_url("https://yerel.example.com/duyuru")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.title, "Belediye duyurusu");
        assert_eq!(local.summary.as_deref(), Some("Yarın su kesintisi olacak."));
        assert!(local.image_url.is_none());

        let gone = db
            .list_feeds(true)
            .await
            .unwrap()
            .into_iter()
            .find(|f| f.name == "Gone")
            .unwrap();
        assert_eq!(gone.error_count, 1);
        assert!(gone.last_error.unwrap().contains("404"));

        // Second pass updates in place
        let report = ingestor.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 3);
        assert_eq!(db.count_articles(&ArticleFilter::default()).await.unwrap(), 3);

        let markets_again = db
            .get_article_by_url("https://world.example.com/markets")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(markets_again.id, markets.id);
        assert_eq!(markets_again.created_at, markets.created_at);
    }
}
