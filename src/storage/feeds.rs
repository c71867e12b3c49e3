use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Feed, FeedDbRow, NewFeed, StoreError};

const INSERT_FEED: &str = "INSERT INTO feeds (name, url, category_id, owner_id, active, \
                           auto_fetch, fetch_interval_minutes) ";

const FEED_COLUMNS: &str = "id, name, url, category_id, owner_id, active, auto_fetch, \
                            fetch_interval_minutes, last_fetched";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Sync feeds from the config file (upsert by URL)
    ///
    /// Batched in chunks of 100 inside one transaction. `last_fetched` is never
    /// touched, so re-syncing does not make feeds due again. When the same URL
    /// is listed twice the later entry wins, since SQLite refuses to upsert one
    /// row twice in a single statement.
    pub async fn sync_feeds(&self, feeds: &[NewFeed]) -> Result<(), StoreError> {
        let feeds = dedup_by_url(feeds);
        if feeds.is_empty() {
            return Ok(());
        }

        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(INSERT_FEED);

            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(&feed.name)
                    .push_bind(&feed.url)
                    .push_bind(feed.category_id)
                    .push_bind(feed.owner_id)
                    .push_bind(feed.active)
                    .push_bind(feed.auto_fetch)
                    .push_bind(feed.fetch_interval_minutes);
            });

            builder.push(
                " ON CONFLICT(url) DO UPDATE SET \
                 name = excluded.name, \
                 category_id = excluded.category_id, \
                 owner_id = excluded.owner_id, \
                 active = excluded.active, \
                 auto_fetch = excluded.auto_fetch, \
                 fetch_interval_minutes = excluded.fetch_interval_minutes",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert a single feed and return its id.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(&format!(
            "{INSERT_FEED} VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id"
        ))
        .bind(&feed.name)
        .bind(&feed.url)
        .bind(feed.category_id)
        .bind(feed.owner_id)
        .bind(feed.active)
        .bind(feed.auto_fetch)
        .bind(feed.fetch_interval_minutes)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// All feeds, ordered by id.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedDbRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Feeds eligible for batch runs, ordered by id.
    pub async fn list_active_auto_fetch(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE active = 1 AND auto_fetch = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Record a completed run.
    ///
    /// The stored value only moves forward: two overlapping runs finishing
    /// out of order leave the later timestamp in place.
    pub async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET last_fetched = MAX(COALESCE(last_fetched, 0), ?) WHERE id = ?",
        )
        .bind(at.timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Collapses entries sharing a URL into the last one, at the position of the
/// first. Feeds without a URL never conflict and are all kept.
fn dedup_by_url(feeds: &[NewFeed]) -> Vec<&NewFeed> {
    let mut unique: Vec<&NewFeed> = Vec::with_capacity(feeds.len());
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for feed in feeds {
        let Some(url) = feed.url.as_deref() else {
            unique.push(feed);
            continue;
        };
        if let Some(&index) = seen.get(url) {
            tracing::warn!(
                url,
                name = %feed.name,
                "Feed URL listed more than once; using the last entry"
            );
            unique[index] = feed;
        } else {
            seen.insert(url, unique.len());
            unique.push(feed);
        }
    }
    unique
}
