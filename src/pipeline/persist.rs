use std::sync::Arc;

use super::error::IngestError;
use super::result::RunCounts;
use super::signal::{Interrupted, RunSignal};
use crate::storage::{ArticleStore, NormalizedArticle};

/// What happened to one submitted article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored(i64),
    /// The store already had this identity
    Duplicate,
    /// Any other store failure; the run carries on
    Failed,
}

/// Submits articles to the store and tallies the outcome.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    store: Arc<dyn ArticleStore>,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// Stores `article` and updates `counts`.
    ///
    /// Store failures are absorbed: a uniqueness violation counts as skipped,
    /// anything else as an error.
    ///
    /// # Errors
    ///
    /// Only [`Interrupted`], when the run signal fires before the store answers.
    pub async fn persist(
        &self,
        article: &NormalizedArticle,
        counts: &mut RunCounts,
        signal: &RunSignal,
    ) -> Result<PersistOutcome, Interrupted> {
        let result = signal.guard(self.store.create_article(article)).await?;

        let outcome = match result.map_err(IngestError::from) {
            Ok(id) => {
                counts.new += 1;
                tracing::debug!(
                    feed_id = article.feed_id,
                    article_id = id,
                    guid = %article.guid,
                    "Stored article"
                );
                PersistOutcome::Stored(id)
            }
            Err(IngestError::DuplicateSkip { guid }) => {
                counts.skipped += 1;
                tracing::debug!(
                    feed_id = article.feed_id,
                    guid = %guid,
                    "Article already stored, skipping"
                );
                PersistOutcome::Duplicate
            }
            Err(e) => {
                counts.errors += 1;
                tracing::warn!(
                    feed_id = article.feed_id,
                    guid = %article.guid,
                    error = %e,
                    "Failed to store article"
                );
                PersistOutcome::Failed
            }
        };
        Ok(outcome)
    }
}
