use std::collections::HashSet;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, NormalizedArticle, StoreError};

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Every identity already stored for `feed_id`.
    pub async fn existing_identities(&self, feed_id: i64) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT guid FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(guid,)| guid).collect())
    }

    /// Insert one article, returning its id.
    ///
    /// A plain INSERT: the `UNIQUE(feed_id, guid)` constraint is the final
    /// word on duplicates and surfaces as [`StoreError::Duplicate`].
    pub async fn create_article(&self, article: &NormalizedArticle) -> Result<i64, StoreError> {
        let tags = serde_json::to_string(&article.tags)
            .map_err(|e| StoreError::Rejected(format!("unserializable tags: {e}")))?;
        let now = chrono::Utc::now().timestamp();

        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO articles
                (feed_id, guid, title, link, content, summary, image_url, author, tags,
                 published_at, category_id, owner_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(article.feed_id)
        .bind(&article.guid)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(&article.image_url)
        .bind(&article.author)
        .bind(&tags)
        .bind(article.published_at.timestamp())
        .bind(article.category_id)
        .bind(article.owner_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((id,)) => Ok(id),
            Err(e) => Err(StoreError::from_insert(e, article.feed_id, &article.guid)),
        }
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles for a feed, newest first. Capped at 2000 rows.
    pub async fn get_articles_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, StoreError> {
        let limit = limit.unwrap_or(500).clamp(1, MAX_ARTICLES);
        let rows: Vec<ArticleDbRow> = sqlx::query_as(
            r#"
            SELECT id, feed_id, guid, title, link, content, summary, image_url, author, tags,
                   published_at, category_id, owner_id, created_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn count_articles(&self, feed_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
