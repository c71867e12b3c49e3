use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{Feed, NormalizedArticle, StoreError};

/// Source of feed configuration for the pipeline.
#[async_trait]
pub trait FeedRegistry: Send + Sync {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError>;

    /// Active feeds with auto-fetch enabled, in a stable order.
    async fn list_active_auto_fetch(&self) -> Result<Vec<Feed>, StoreError>;

    /// Must never move `last_fetched` backwards.
    async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Destination for normalized articles.
///
/// Implementations must reject a second article with the same
/// `(feed_id, guid)` with [`StoreError::Duplicate`]. The pipeline's own
/// duplicate check is only a fast path; concurrent runs rely on this.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn existing_identities(&self, feed_id: i64) -> Result<HashSet<String>, StoreError>;

    async fn create_article(&self, article: &NormalizedArticle) -> Result<i64, StoreError>;
}

#[async_trait]
impl FeedRegistry for Database {
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        Database::get_feed(self, feed_id).await
    }

    async fn list_active_auto_fetch(&self) -> Result<Vec<Feed>, StoreError> {
        Database::list_active_auto_fetch(self).await
    }

    async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        Database::mark_fetched(self, feed_id, at).await
    }
}

#[async_trait]
impl ArticleStore for Database {
    async fn existing_identities(&self, feed_id: i64) -> Result<HashSet<String>, StoreError> {
        Database::existing_identities(self, feed_id).await
    }

    async fn create_article(&self, article: &NormalizedArticle) -> Result<i64, StoreError> {
        Database::create_article(self, article).await
    }
}
