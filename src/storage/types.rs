use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::FeedConfig;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors, classified so the pipeline can tell "already imported"
/// apart from real failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(feed_id, guid)` pair already exists
    #[error("article {guid:?} already stored for feed {feed_id}")]
    Duplicate { feed_id: i64, guid: String },

    /// The store refused the record (constraint other than uniqueness)
    #[error("article rejected by store: {0}")]
    Rejected(String),

    /// Another process holds the database lock
    #[error("The database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Other(err)
    }

    /// Classifies a failed article insert.
    pub(crate) fn from_insert(err: sqlx::Error, feed_id: i64, guid: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return StoreError::Duplicate {
                        feed_id,
                        guid: guid.to_string(),
                    };
                }
                sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => {
                    return StoreError::Rejected(db_err.message().to_string());
                }
                _ => {}
            }
        }
        Self::from_sqlx(err)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

pub(crate) fn is_lock_error(message: &str) -> bool {
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub category_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub active: bool,
    pub auto_fetch: bool,
    pub fetch_interval_minutes: i64,
    pub last_fetched: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: Arc::from(self.name),
            url: self.url,
            category_id: self.category_id,
            owner_id: self.owner_id,
            active: self.active,
            auto_fetch: self.auto_fetch,
            fetch_interval_minutes: self.fetch_interval_minutes,
            last_fetched: self.last_fetched.and_then(from_timestamp),
        }
    }
}

/// Internal row type for article queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub content: String,
    pub summary: String,
    pub image_url: Option<String>,
    pub author: String,
    pub tags: String,
    pub published_at: i64,
    pub category_id: i64,
    pub owner_id: Option<i64>,
    pub created_at: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        let tags = serde_json::from_str(&self.tags).unwrap_or_else(|e| {
            tracing::warn!(
                article_id = self.id,
                error = %e,
                "Unreadable tag list, treating as empty"
            );
            Vec::new()
        });
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: Arc::from(self.title),
            link: self.link,
            content: self.content,
            summary: self.summary,
            image_url: self.image_url,
            author: self.author,
            tags,
            published_at: from_timestamp(self.published_at).unwrap_or_default(),
            category_id: self.category_id,
            owner_id: self.owner_id,
            created_at: from_timestamp(self.created_at).unwrap_or_default(),
        }
    }
}

fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

// ============================================================================
// Data Structures
// ============================================================================

/// A feed known to the registry.
///
/// `name` uses `Arc<str>`: every result and log line for the feed carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: Arc<str>,
    /// Source URL; `None` for feeds registered without one
    pub url: Option<String>,
    pub category_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub active: bool,
    pub auto_fetch: bool,
    pub fetch_interval_minutes: i64,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl Feed {
    /// True when the feed has never been fetched or its interval has elapsed.
    ///
    /// A non-positive interval means "every run". An interval too large to
    /// represent never elapses.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_fetched {
            None => true,
            Some(_) if self.fetch_interval_minutes <= 0 => true,
            Some(last) => Duration::try_minutes(self.fetch_interval_minutes)
                .is_some_and(|interval| now.signed_duration_since(last) >= interval),
        }
    }
}

/// A feed to insert or update in the registry, keyed by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeed {
    pub name: String,
    pub url: Option<String>,
    pub category_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub active: bool,
    pub auto_fetch: bool,
    pub fetch_interval_minutes: i64,
}

impl From<&FeedConfig> for NewFeed {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            url: Some(cfg.url.clone()),
            category_id: cfg.category_id,
            owner_id: cfg.owner_id,
            active: cfg.active,
            auto_fetch: cfg.auto_fetch,
            fetch_interval_minutes: cfg.fetch_interval_minutes,
        }
    }
}

/// An article ready for the store: cleaned, summarized and identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedArticle {
    pub feed_id: i64,
    /// Item identity; unique per feed
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub content: String,
    pub summary: String,
    pub image_url: Option<String>,
    pub author: String,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub category_id: i64,
    pub owner_id: Option<i64>,
}

/// A stored article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    #[serde(serialize_with = "serialize_arc_str")]
    pub title: Arc<str>,
    pub link: Option<String>,
    pub content: String,
    pub summary: String,
    pub image_url: Option<String>,
    pub author: String,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub category_id: i64,
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

fn serialize_arc_str<S: serde::Serializer>(value: &Arc<str>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(value)
}
