//! Machine translation behind a bounded, in-process cache

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TranslationError;

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str)
        -> Result<String, TranslationError>;
}

/// Public Google Translate web endpoint (`client=gtx`)
pub struct GoogleTranslate {
    client: Client,
    endpoint: String,
}

impl GoogleTranslate {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TranslationProvider for GoogleTranslate {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_language),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        join_segments(&body)
    }
}

/// The response is `[[[translated, original, ...], ...], ...]`; one segment per sentence
fn join_segments(body: &Value) -> Result<String, TranslationError> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::Malformed("missing segment list".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if translated.is_empty() {
        Err(TranslationError::Malformed("no translated text".to_string()))
    } else {
        Ok(translated)
    }
}

type CacheKey = (String, String);

/// FIFO-bounded map: once over capacity, the oldest inserted entry goes first
struct TranslationCache {
    capacity: usize,
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

impl TranslationCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<&String> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: CacheKey, value: String) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Best-effort translator: never fails, falls back to the input text
pub struct Translator {
    provider: Arc<dyn TranslationProvider>,
    cache: Mutex<TranslationCache>,
}

impl Translator {
    pub fn new(provider: Arc<dyn TranslationProvider>, capacity: usize) -> Self {
        Self {
            provider,
            cache: Mutex::new(TranslationCache::new(capacity)),
        }
    }

    pub async fn translate(&self, text: &str, target_language: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let key = (text.to_string(), target_language.to_string());
        let cached = self.cache().get(&key).cloned();
        if let Some(translated) = cached {
            debug!("Translation cache hit ({} chars)", text.len());
            return translated;
        }

        match self.provider.translate(text, target_language).await {
            Ok(translated) => {
                self.cache().insert(key, translated.clone());
                translated
            }
            Err(e) => {
                warn!("Translation to '{}' failed: {}", target_language, e);
                text.to_string()
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache().entries.len()
    }

    pub fn clear(&self) {
        self.cache().clear();
    }

    fn cache(&self) -> MutexGuard<'_, TranslationCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
