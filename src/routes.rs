use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use reqwest::Url;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::FeedConfig;
use crate::db::{Article, ArticleFilter, Database, FeedUpdate, SearchFilter};
use crate::ingest::Ingestor;
use crate::scheduler::Scheduler;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/news", get(list_news))
        .route("/api/v1/news/search", post(search_news))
        .route("/api/v1/news/:id", get(get_news))
        .route("/api/v1/feeds", get(list_feeds).post(create_feed))
        .route("/api/v1/feeds/:id", put(update_feed).delete(delete_feed))
        .route("/api/v1/admin/feeds/refresh", post(refresh))
        .route("/api/v1/admin/stats", get(admin_stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Errors are reported as `{"error": "..."}`
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
            AppError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub source: Option<String>,
    pub search: Option<String>,
}

impl NewsQuery {
    fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct NewsPage {
    pub articles: Vec<Article>,
    pub pagination: Pagination,
}

pub async fn list_news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Result<Json<NewsPage>, AppError> {
    let (page, limit) = (query.page(), query.limit());
    let filter = ArticleFilter {
        category: query.category,
        source: query.source,
        search: query.search,
    };

    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AppError::BadRequest(format!("Page out of range: {}", page)))?;

    let articles = state.db.list_articles(&filter, limit, offset).await?;
    let total = state.db.count_articles(&filter).await?;

    Ok(Json(NewsPage {
        articles,
        pagination: Pagination {
            page,
            limit,
            total,
            pages: (total + limit - 1) / limit,
        },
    }))
}

pub async fn get_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Article>, AppError> {
    state
        .db
        .view_article(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Article not found".to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub category: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    #[serde(default)]
    pub filters: SearchFilters,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub articles: Vec<Article>,
    pub count: usize,
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD`. A bare date resolves to the start
/// of that day, or its last microsecond when `end_of_day` is set.
pub fn parse_date_bound(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let at = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(at.and_utc())
}

fn date_filter(value: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, AppError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_date_bound(v, end_of_day)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid date: {}", v))),
    }
}

pub async fn search_news(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResults>, AppError> {
    let filter = SearchFilter {
        query: request.query,
        category: request.filters.category,
        date_from: date_filter(request.filters.date_from.as_deref(), false)?,
        date_to: date_filter(request.filters.date_to.as_deref(), true)?,
    };

    let articles = state.db.search_articles(&filter).await?;
    Ok(Json(SearchResults {
        count: articles.len(),
        articles,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedsQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn list_feeds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let feeds = state.db.list_feeds(query.all).await?;
    Ok(Json(json!({ "feeds": feeds })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub category: String,
    pub language: Option<String>,
    pub is_active: Option<bool>,
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        Err(AppError::BadRequest(format!("{} is required", field)))
    } else {
        Ok(value.to_string())
    }
}

fn valid_feed_url(value: &str) -> Result<String, AppError> {
    let value = value.trim();
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value.to_string()),
        _ => Err(AppError::BadRequest(format!("Invalid feed url: {}", value))),
    }
}

fn valid_language(value: &str) -> Result<String, AppError> {
    let value = value.trim().to_lowercase();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
        Ok(value)
    } else {
        Err(AppError::BadRequest(format!("Invalid language: {}", value)))
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

fn duplicate_url(err: anyhow::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict("A feed with this url already exists".to_string())
    } else {
        AppError::Internal(err)
    }
}

pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewFeed>,
) -> Result<impl IntoResponse, AppError> {
    let config = FeedConfig {
        name: required("name", &request.name)?,
        url: valid_feed_url(&request.url)?,
        category: required("category", &request.category)?,
        language: valid_language(request.language.as_deref().unwrap_or("tr"))?,
        is_active: request.is_active.unwrap_or(true),
    };

    let feed = state.db.create_feed(&config).await.map_err(duplicate_url)?;
    info!("Feed '{}' added ({})", feed.name, feed.url);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "feed": feed, "message": "Feed created successfully" })),
    ))
}

pub async fn update_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut update): Json<FeedUpdate>,
) -> Result<impl IntoResponse, AppError> {
    update.name = update.name.as_deref().map(|v| required("name", v)).transpose()?;
    update.url = update.url.as_deref().map(valid_feed_url).transpose()?;
    update.category = update
        .category
        .as_deref()
        .map(|v| required("category", v))
        .transpose()?;
    update.language = update.language.as_deref().map(valid_language).transpose()?;

    let feed = state
        .db
        .update_feed(id, &update)
        .await
        .map_err(duplicate_url)?
        .ok_or_else(|| AppError::NotFound("Feed not found".to_string()))?;
    info!("Feed '{}' updated", feed.name);
    Ok(Json(json!({ "feed": feed, "message": "Feed updated successfully" })))
}

pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_feed(id).await? {
        return Err(AppError::NotFound("Feed not found".to_string()));
    }
    info!("Feed {} deleted", id);
    Ok(Json(json!({ "message": "Feed deleted successfully" })))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let report = state.ingestor.run_ingestion_cycle().await?;
    Ok(Json(json!({
        "message": "Feeds refreshed successfully",
        "result": report,
    })))
}

pub async fn admin_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.db.stats().await?;
    Ok(Json(json!({
        "stats": stats,
        "ingestion": {
            "inFlight": state.ingestor.in_flight(),
            "schedulerRunning": state.scheduler.is_running(),
        },
    })))
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
