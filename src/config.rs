use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Per-request timeout for feed downloads, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
    /// Language articles are translated into when their feed declares another one
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Summary budget in characters, not counting the ellipsis
    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
    #[serde(default = "default_translation_cache_capacity")]
    pub translation_cache_capacity: usize,
    #[serde(default = "default_translate_endpoint")]
    pub translate_endpoint: String,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_items_per_feed() -> usize {
    10
}

fn default_target_language() -> String {
    "tr".to_string()
}

fn default_summary_length() -> usize {
    300
}

fn default_translation_cache_capacity() -> usize {
    1000
}

fn default_translate_endpoint() -> String {
    "https://translate.googleapis.com/translate_a/single".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    pub category: String,
    #[serde(default = "default_feed_language")]
    pub language: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_feed_language() -> String {
    "tr".to_string()
}

fn default_is_active() -> bool {
    true
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
