use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use haber_akisi::config::Config;
use haber_akisi::db::Database;
use haber_akisi::fetcher::Fetcher;
use haber_akisi::ingest::Ingestor;
use haber_akisi::normalizer::Normalizer;
use haber_akisi::routes::{self, AppState};
use haber_akisi::scheduler::Scheduler;
use haber_akisi::translation::{GoogleTranslate, Translator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haber_akisi=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:haber_akisi.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_feeds(&config.feeds).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Build the ingestion pipeline
    let timeout = Duration::from_secs(config.fetch_timeout_secs);
    let provider = GoogleTranslate::new(config.translate_endpoint.clone(), timeout)?;
    let translator = Arc::new(Translator::new(
        Arc::new(provider),
        config.translation_cache_capacity,
    ));
    let normalizer = Normalizer::new(translator, &config.target_language, config.summary_length);
    let fetcher = Fetcher::new(timeout, config.max_items_per_feed)?;
    let ingestor = Arc::new(Ingestor::new(db.clone(), fetcher, normalizer));

    // Start background refresh
    let scheduler = Arc::new(Scheduler::new(
        ingestor.clone(),
        Duration::from_secs(config.refresh_interval * 60),
    ));
    scheduler.start();

    let state = Arc::new(AppState {
        db,
        ingestor,
        scheduler: scheduler.clone(),
    });
    let app = routes::router(state);

    // Start server
    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server starting on http://localhost:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
