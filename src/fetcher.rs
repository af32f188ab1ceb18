use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::{model::Entry, parser};
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{info, warn};

use crate::db::FeedSource;
use crate::error::{FetchError, ItemProcessingError};
use crate::normalizer::{decode_entities, strip_html};

static ITEM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item[\s>].*?</item>").expect("valid item pattern"));
static ENCLOSURE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<enclosure\b([^>]*)>").expect("valid enclosure pattern"));
static MEDIA_CONTENT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<media:content\b([^>]*)>").expect("valid media content pattern")
});
static IMAGE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<image\b[^>]*>(.*?)</image>").expect("valid image pattern"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z_:][\w:.-]*)\s*=\s*["']([^"']*)["']"#).expect("valid attribute pattern")
});

/// `<media:content>` entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaContent {
    pub url: String,
    /// Top-level medium (`image`, `video`, ...) when the feed declares one
    pub medium: Option<String>,
}

/// RSS `<enclosure>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
}

/// A feed entry as delivered, before normalization
#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub guid: String,
    pub title: Option<String>,
    pub link: String,
    pub published: DateTime<Utc>,
    /// Full HTML body (`content:encoded`, Atom content)
    pub content: Option<String>,
    /// HTML description (RSS description, Atom summary)
    pub description: Option<String>,
    /// Media description, if the feed carries one
    pub summary: Option<String>,
    /// Plain-text rendition of the body
    pub snippet: Option<String>,
    pub media_content: Vec<MediaContent>,
    pub media_thumbnails: Vec<String>,
    pub enclosures: Vec<Enclosure>,
    /// Item-level `<image><url>`
    pub image_url: Option<String>,
}

/// Fields feed_rs folds away or drops, recovered from the raw XML
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemExtras {
    pub enclosures: Vec<Enclosure>,
    pub image_url: Option<String>,
    /// `<media:content>` medium by URL (see `url_key`); feed_rs drops the attribute
    pub media_mediums: HashMap<String, String>,
}

pub struct Fetcher {
    client: Client,
    max_items: usize,
}

impl Fetcher {
    pub fn new(timeout: Duration, max_items: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("HaberAkisi/1.0 (RSS Aggregator)")
            .build()?;

        Ok(Self { client, max_items })
    }

    pub async fn fetch_feed(&self, feed: &FeedSource) -> Result<Vec<RawItem>, FetchError> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let response = self
            .client
            .get(&feed.url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&feed.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: feed.url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(&feed.url, e))?;

        let items = self.parse_document(&feed.url, &bytes)?;
        info!("Parsed {} items from feed '{}'", items.len(), feed.name);
        Ok(items)
    }

    /// Parse a feed document, skipping entries that cannot be used
    pub fn parse_document(&self, url: &str, bytes: &[u8]) -> Result<Vec<RawItem>, FetchError> {
        let extras = Self::extract_item_extras(bytes);

        let parsed = parser::parse(bytes).map_err(|source| FetchError::Parse {
            url: url.to_string(),
            source,
        })?;

        let fetched_at = Utc::now();
        let mut items = Vec::new();
        for entry in parsed.entries.into_iter().take(self.max_items) {
            match Self::raw_item_from_entry(entry, &extras, fetched_at) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping entry from {}: {}", url, e),
            }
        }

        Ok(items)
    }

    pub fn raw_item_from_entry(
        entry: Entry,
        extras: &HashMap<String, ItemExtras>,
        fetched_at: DateTime<Utc>,
    ) -> Result<RawItem, ItemProcessingError> {
        // The first link is the article itself; some feeds only carry a permalink guid
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|href| !href.is_empty())
            .or_else(|| is_http_url(&entry.id).then(|| entry.id.trim().to_string()))
            .ok_or_else(|| ItemProcessingError::MissingLink {
                id: entry.id.clone(),
            })?;

        let extra = extras.get(&link).cloned().unwrap_or_default();
        let enclosure_urls: HashSet<String> =
            extra.enclosures.iter().map(|e| url_key(&e.url)).collect();

        let mut media_content = Vec::new();
        let mut media_thumbnails = Vec::new();
        let mut media_description = None;
        for object in &entry.media {
            for content in &object.content {
                let Some(url) = content.url.as_ref().map(|u| u.to_string()) else {
                    continue;
                };
                let key = url_key(&url);
                // feed_rs reports enclosures as media objects too
                if enclosure_urls.contains(&key) {
                    continue;
                }
                let medium = extra.media_mediums.get(&key).cloned().or_else(|| {
                    content
                        .content_type
                        .as_ref()
                        .map(|mime| mime.ty().as_str().to_lowercase())
                });
                media_content.push(MediaContent { url, medium });
            }
            media_thumbnails.extend(object.thumbnails.iter().map(|t| t.image.uri.clone()));
            if media_description.is_none() {
                media_description = object.description.as_ref().map(|d| d.content.clone());
            }
        }

        let content = entry.content.and_then(|c| c.body);
        let description = entry.summary.map(|s| s.content);
        let snippet = content
            .as_deref()
            .or(description.as_deref())
            .map(strip_html)
            .filter(|s| !s.is_empty());

        Ok(RawItem {
            guid: entry.id,
            title: entry.title.map(|t| t.content.trim().to_string()),
            link,
            published: entry.published.or(entry.updated).unwrap_or(fetched_at),
            content,
            description,
            summary: media_description,
            snippet,
            media_content,
            media_thumbnails,
            enclosures: extra.enclosures,
            image_url: extra.image_url,
        })
    }

    /// Extract enclosures, media mediums and item images from raw RSS XML, keyed by item link
    pub fn extract_item_extras(xml_bytes: &[u8]) -> HashMap<String, ItemExtras> {
        let mut extras = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return extras,
        };

        for item in ITEM_BLOCK.find_iter(xml_str) {
            let item = item.as_str();
            let Some(link) = Self::extract_xml_element(item, "link") else {
                continue;
            };

            let enclosures: Vec<Enclosure> = ENCLOSURE_TAG
                .captures_iter(item)
                .filter_map(|caps| {
                    let attrs = parse_attributes(caps.get(1)?.as_str());
                    let url = attrs.get("url")?.trim().to_string();
                    (!url.is_empty()).then(|| Enclosure {
                        url,
                        mime_type: attrs.get("type").map(|t| t.trim().to_lowercase()),
                    })
                })
                .collect();

            let image_url = IMAGE_BLOCK
                .captures(item)
                .and_then(|caps| Self::extract_xml_element(caps.get(1)?.as_str(), "url"))
                .filter(|url| !url.is_empty());

            let media_mediums: HashMap<String, String> = MEDIA_CONTENT_TAG
                .captures_iter(item)
                .filter_map(|caps| {
                    let attrs = parse_attributes(caps.get(1)?.as_str());
                    let url = attrs.get("url")?.trim();
                    let medium = attrs.get("medium").map(|m| m.trim().to_lowercase()).or_else(
                        || {
                            let mime = attrs.get("type")?;
                            mime.split('/').next().map(|t| t.trim().to_lowercase())
                        },
                    )?;
                    (!url.is_empty() && !medium.is_empty()).then(|| (url_key(url), medium))
                })
                .collect();

            if !enclosures.is_empty() || image_url.is_some() || !media_mediums.is_empty() {
                extras.insert(
                    link,
                    ItemExtras {
                        enclosures,
                        image_url,
                        media_mediums,
                    },
                );
            }
        }

        extras
    }

    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);

        let start = xml.find(&start_tag)? + start_tag.len();
        let end = xml[start..].find(&end_tag)? + start;

        let value = xml[start..end].trim();
        let value = value
            .strip_prefix("<![CDATA[")
            .and_then(|v| v.strip_suffix("]]>"))
            .unwrap_or(value);

        Some(decode_entities(value.trim()))
    }
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| (caps[1].to_lowercase(), decode_entities(&caps[2])))
        .collect()
}

/// Comparable form of a URL; `Url` normalizes host case, empty paths and escapes
fn url_key(raw: &str) -> String {
    let raw = raw.trim();
    Url::parse(raw)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}
