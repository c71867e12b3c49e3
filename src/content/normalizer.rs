use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::sanitizer::{decode_entities, first_img_src, text_content, ContentSanitizer};
use crate::feed::{MediaKind, RawFeedItem};
use crate::storage::NormalizedArticle;
use crate::util::truncate_at_word;

/// Author recorded when an item names none
pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("item has no title")]
    MissingTitle,
}

/// Where an item's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Guid,
    Link,
    /// Hash of title, description and pubDate
    Surrogate,
}

/// The key an item is deduplicated and stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemIdentity {
    pub value: String,
    pub source: IdentitySource,
}

/// Resolves an item's identity: explicit guid, then link, then a content hash.
///
/// The hash covers only feed-provided text, so the same item yields the same
/// identity on every run.
pub fn resolve_identity(item: &RawFeedItem) -> ItemIdentity {
    if let Some(guid) = non_blank(item.guid.as_deref()) {
        return ItemIdentity {
            value: guid.to_string(),
            source: IdentitySource::Guid,
        };
    }
    if let Some(link) = non_blank(item.link.as_deref()) {
        return ItemIdentity {
            value: link.to_string(),
            source: IdentitySource::Link,
        };
    }

    let input = format!(
        "{}|{}|{}",
        item.title.as_deref().unwrap_or("").trim(),
        item.description.as_deref().unwrap_or("").trim(),
        item.pub_date.as_deref().unwrap_or("").trim(),
    );
    let hash = Sha256::digest(input.as_bytes());
    ItemIdentity {
        value: format!("{:x}", hash),
        source: IdentitySource::Surrogate,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Feed-level values copied onto every article of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedContext {
    pub feed_id: i64,
    pub category_id: i64,
    pub owner_id: Option<i64>,
}

type Strategy<T> = fn(&RawFeedItem) -> Option<T>;

/// Image candidates in precedence order. Each returns the raw URL as found.
const IMAGE_STRATEGIES: &[Strategy<String>] = &[
    image_from_enclosure,
    image_from_media_content,
    image_from_media_group,
    image_from_media_thumbnail,
    image_from_image_element,
    image_from_inline_markup,
];

const AUTHOR_STRATEGIES: &[Strategy<String>] = &[author_from_creator, author_from_author];

const DATE_STRATEGIES: &[Strategy<DateTime<Utc>>] = &[date_from_iso, date_from_pub_date];

fn image_from_enclosure(item: &RawFeedItem) -> Option<String> {
    item.enclosures
        .iter()
        .find(|e| {
            e.mime_type
                .as_deref()
                .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
        })
        .map(|e| e.url.clone())
}

fn first_media(item: &RawFeedItem, kind: MediaKind) -> Option<String> {
    item.media
        .iter()
        .find(|m| m.kind == kind && m.may_be_image())
        .map(|m| m.url.clone())
}

fn image_from_media_content(item: &RawFeedItem) -> Option<String> {
    first_media(item, MediaKind::Content)
}

fn image_from_media_group(item: &RawFeedItem) -> Option<String> {
    first_media(item, MediaKind::GroupContent)
}

fn image_from_media_thumbnail(item: &RawFeedItem) -> Option<String> {
    first_media(item, MediaKind::Thumbnail)
}

fn image_from_image_element(item: &RawFeedItem) -> Option<String> {
    non_blank(item.image.as_deref()).map(str::to_string)
}

/// Entity-escaped HTML is decoded first so `&lt;img src=...&gt;` counts.
fn image_from_inline_markup(item: &RawFeedItem) -> Option<String> {
    [item.content.as_deref(), item.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|html| {
            let decoded = decode_entities(html);
            first_img_src(&decoded).map(str::to_string)
        })
}

fn author_from_creator(item: &RawFeedItem) -> Option<String> {
    non_blank(item.creator.as_deref()).map(str::to_string)
}

fn author_from_author(item: &RawFeedItem) -> Option<String> {
    non_blank(item.author.as_deref()).map(str::to_string)
}

fn date_from_iso(item: &RawFeedItem) -> Option<DateTime<Utc>> {
    item.iso_date.as_deref().and_then(parse_iso_date)
}

fn date_from_pub_date(item: &RawFeedItem) -> Option<DateTime<Utc>> {
    item.pub_date.as_deref().and_then(parse_rfc822_date)
}

fn parse_iso_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offset-less forms seen in dc:date; taken as UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    None
}

fn parse_rfc822_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Turns raw feed items into [`NormalizedArticle`]s.
#[derive(Debug, Clone)]
pub struct ItemNormalizer {
    summary_max_length: usize,
}

impl ItemNormalizer {
    pub fn new(summary_max_length: usize) -> Self {
        Self { summary_max_length }
    }

    /// Builds the article for `item`.
    ///
    /// `now` is the publish time used when the item carries no parseable date.
    ///
    /// # Errors
    ///
    /// [`NormalizationError::MissingTitle`] if the title is absent or empty
    /// once markup and whitespace are removed.
    pub fn normalize(
        &self,
        item: &RawFeedItem,
        identity: ItemIdentity,
        feed: FeedContext,
        sanitizer: &ContentSanitizer,
        now: DateTime<Utc>,
    ) -> Result<NormalizedArticle, NormalizationError> {
        let title = item
            .title
            .as_deref()
            .map(|t| sanitizer.plain_text(t))
            .filter(|t| !t.is_empty())
            .ok_or(NormalizationError::MissingTitle)?;

        let body = item
            .content
            .as_deref()
            .or(item.description.as_deref())
            .unwrap_or_default();
        let content = sanitizer.sanitize(body);
        let summary =
            truncate_at_word(&text_content(&content), self.summary_max_length).into_owned();

        let image_url = IMAGE_STRATEGIES
            .iter()
            .find_map(|strategy| strategy(item))
            .and_then(|raw| sanitizer.resolve_url(&raw));

        let author = AUTHOR_STRATEGIES
            .iter()
            .find_map(|strategy| strategy(item))
            .map(|a| sanitizer.plain_text(&a))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        let published_at = DATE_STRATEGIES
            .iter()
            .find_map(|strategy| strategy(item))
            .unwrap_or(now);

        Ok(NormalizedArticle {
            feed_id: feed.feed_id,
            guid: identity.value,
            title,
            link: non_blank(item.link.as_deref()).and_then(|l| sanitizer.resolve_url(l)),
            content,
            summary,
            image_url,
            author,
            tags: normalize_tags(&item.categories),
            published_at,
            category_id: feed.category_id,
            owner_id: feed.owner_id,
        })
    }
}

fn normalize_tags(categories: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(categories.len());
    for tag in categories.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
