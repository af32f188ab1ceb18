//! Turns raw feed entries into uniform article records.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::db::FeedSource;
use crate::fetcher::{Enclosure, MediaContent, RawItem};
use crate::translation::Translator;

pub const ELLIPSIS: &str = "...";
const UNTITLED: &str = "Untitled";
const WORDS_PER_MINUTE: usize = 200;

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["'][^>]*>"#).expect("valid img pattern")
});
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#([xX]?)([0-9a-fA-F]+);").expect("valid entity pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedArticle {
    pub feed_id: i64,
    pub title: String,
    /// Canonical URL, the dedup key
    pub url: String,
    pub summary: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub category: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub reading_time_seconds: i64,
}

pub struct Normalizer {
    translator: Arc<Translator>,
    target_language: String,
    summary_length: usize,
}

impl Normalizer {
    pub fn new(translator: Arc<Translator>, target_language: &str, summary_length: usize) -> Self {
        Self {
            translator,
            target_language: target_language.to_string(),
            summary_length,
        }
    }

    pub fn needs_translation(&self, feed: &FeedSource) -> bool {
        !feed.language.eq_ignore_ascii_case(&self.target_language)
    }

    pub async fn normalize(&self, item: RawItem, feed: &FeedSource) -> NormalizedArticle {
        let image_url = extract_image(&item);
        let reading_time_seconds = reading_time_seconds(&body_text(&item));

        let title = item
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();
        let (summary, mut truncated) = truncate_chars(&summary_text(&item), self.summary_length);

        let (title, summary) = if self.needs_translation(feed) {
            tokio::join!(
                self.translator.translate(&title, &self.target_language),
                self.translator.translate(&summary, &self.target_language),
            )
        } else {
            (title, summary)
        };

        // Translations can come back longer than the source text
        let (summary, cut) = truncate_chars(&summary, self.summary_length);
        truncated |= cut;
        let summary = if truncated {
            format!("{}{}", summary.trim_end(), ELLIPSIS)
        } else {
            summary
        };

        NormalizedArticle {
            feed_id: feed.id,
            title,
            url: item.link,
            summary,
            content: item.content.or(item.description),
            image_url,
            category: feed.category.clone(),
            source: feed.name.clone(),
            published_at: item.published,
            reading_time_seconds,
        }
    }
}

/// Pick the article image; the first source that yields a URL wins
pub fn extract_image(item: &RawItem) -> Option<String> {
    media_content_image(&item.media_content)
        .or_else(|| {
            item.media_thumbnails
                .iter()
                .map(|url| url.trim())
                .find(|url| !url.is_empty())
                .map(str::to_string)
        })
        .or_else(|| {
            item.enclosures
                .iter()
                .find(|e| is_image_enclosure(e))
                .map(|e| e.url.clone())
        })
        .or_else(|| {
            [&item.content, &item.description, &item.summary]
                .into_iter()
                .flatten()
                .find_map(|html| first_img_src(html))
        })
        .or_else(|| {
            item.image_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
        })
}

fn media_content_image(media: &[MediaContent]) -> Option<String> {
    let usable = || media.iter().filter(|m| !m.url.trim().is_empty());

    usable()
        .find(|m| m.medium.as_deref() == Some("image"))
        .or_else(|| usable().find(|m| m.medium.is_none()))
        .map(|m| m.url.trim().to_string())
}

fn is_image_enclosure(enclosure: &Enclosure) -> bool {
    !enclosure.url.trim().is_empty()
        && enclosure
            .mime_type
            .as_deref()
            .map_or(true, |mime| mime.starts_with("image/"))
}

pub fn first_img_src(html: &str) -> Option<String> {
    IMG_SRC
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
}

fn summary_text(item: &RawItem) -> String {
    [&item.snippet, &item.summary, &item.description, &item.content]
        .into_iter()
        .flatten()
        .map(|text| strip_html(text))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn body_text(item: &RawItem) -> String {
    [&item.content, &item.snippet, &item.description]
        .into_iter()
        .flatten()
        .map(|text| strip_html(text))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Cut `text` to at most `budget` characters; reports whether anything was cut
pub fn truncate_chars(text: &str, budget: usize) -> (String, bool) {
    match text.char_indices().nth(budget) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Estimated reading time at 200 words per minute, in whole minutes (at least one)
pub fn reading_time_seconds(text: &str) -> i64 {
    let words = text.split_whitespace().count();
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    (minutes * 60) as i64
}

pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    decode_entities(&result)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn decode_entities(text: &str) -> String {
    let decoded = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let radix = if caps[1].is_empty() { 10 } else { 16 };
        u32::from_str_radix(&caps[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    decoded
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
