use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{ArticleRepository, Database, FeedSource, UpsertOutcome};
use crate::fetcher::Fetcher;
use crate::normalizer::{NormalizedArticle, Normalizer};

/// Counts from one ingestion cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
}

pub struct Ingestor {
    db: Arc<Database>,
    fetcher: Fetcher,
    normalizer: Normalizer,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Ingestor {
    pub fn new(db: Arc<Database>, fetcher: Fetcher, normalizer: Normalizer) -> Self {
        Self {
            db,
            fetcher,
            normalizer,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of cycles currently running. Overlapping cycles are allowed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn run_ingestion_cycle(&self) -> anyhow::Result<IngestionReport> {
        let _guard = InFlight::enter(&self.in_flight);

        let feeds = self.db.get_active_feeds().await?;
        info!("Refreshing {} feeds", feeds.len());

        let batches = join_all(feeds.iter().map(|feed| self.ingest_source(feed))).await;
        let articles: Vec<NormalizedArticle> = batches.into_iter().flatten().collect();

        let mut report = IngestionReport {
            fetched: articles.len(),
            ..Default::default()
        };

        for article in &articles {
            match self.db.upsert_by_key(article).await {
                Ok(UpsertOutcome::Created) => report.created += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => error!("Failed to save article {}: {:#}", article.url, e),
            }
        }

        info!(
            "Feed refresh complete. Fetched: {}, New: {}, Updated: {}",
            report.fetched, report.created, report.updated
        );
        Ok(report)
    }

    async fn ingest_source(&self, feed: &FeedSource) -> Vec<NormalizedArticle> {
        match self.fetcher.fetch_feed(feed).await {
            Ok(items) => {
                if let Err(e) = self.db.record_fetch_success(feed.id).await {
                    warn!("Could not record fetch status for '{}': {:#}", feed.name, e);
                }
                join_all(
                    items
                        .into_iter()
                        .map(|item| self.normalizer.normalize(item, feed)),
                )
                .await
            }
            Err(e) => {
                error!("Failed to refresh feed '{}': {}", feed.name, e);
                if let Err(db_err) = self.db.record_fetch_failure(feed.id, &e.to_string()).await {
                    warn!("Could not record fetch status for '{}': {:#}", feed.name, db_err);
                }
                Vec::new()
            }
        }
    }
}
