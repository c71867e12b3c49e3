use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use url::Url;

use super::dedup::{DedupDecision, DeduplicationFilter};
use super::error::IngestError;
use super::persist::{PersistOutcome, PersistenceCoordinator};
use super::result::{BatchResult, ProcessingResult, RunCounts, RunOutcome};
use super::signal::RunSignal;
use super::PipelineSettings;
use crate::content::{resolve_identity, ContentSanitizer, FeedContext, ItemNormalizer};
use crate::feed::{parse_feed, FeedFetcher, FetchError};
use crate::storage::{ArticleStore, Feed, FeedRegistry};
use crate::util::{validate_feed_url, HostPolicy};

/// Which feeds a batch run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    /// Active auto-fetch feeds whose fetch interval has elapsed
    Due,
    /// Every active auto-fetch feed, regardless of interval
    All,
}

/// Drives feed runs from fetch to persisted articles.
///
/// One instance is shared by every trigger; it holds no per-run state.
pub struct Orchestrator {
    registry: Arc<dyn FeedRegistry>,
    store: Arc<dyn ArticleStore>,
    fetcher: FeedFetcher,
    normalizer: ItemNormalizer,
    persistence: PersistenceCoordinator,
    host_policy: HostPolicy,
    max_concurrent_feeds: usize,
}

impl Orchestrator {
    /// Builds an orchestrator with its own HTTP client.
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        registry: Arc<dyn FeedRegistry>,
        store: Arc<dyn ArticleStore>,
        settings: &PipelineSettings,
    ) -> Result<Self, FetchError> {
        let fetcher = FeedFetcher::new(&settings.user_agent, settings.fetch_timeout)?;
        Ok(Self::with_fetcher(registry, store, fetcher, settings))
    }

    pub fn with_fetcher(
        registry: Arc<dyn FeedRegistry>,
        store: Arc<dyn ArticleStore>,
        fetcher: FeedFetcher,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            registry,
            persistence: PersistenceCoordinator::new(Arc::clone(&store)),
            store,
            fetcher,
            normalizer: ItemNormalizer::new(settings.summary_max_length),
            host_policy: settings.host_policy,
            max_concurrent_feeds: settings.max_concurrent_feeds.max(1),
        }
    }

    /// Runs one feed end to end. Never fails: problems end up in the result.
    pub async fn run_feed(&self, feed: &Feed, signal: &RunSignal) -> ProcessingResult {
        let started = Instant::now();
        let outcome = self.execute(feed, signal).await;

        match &outcome {
            RunOutcome::Completed(counts) => tracing::info!(
                feed_id = feed.id,
                feed = %feed.name,
                total = counts.total,
                new = counts.new,
                skipped = counts.skipped,
                errors = counts.errors,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Feed run completed"
            ),
            RunOutcome::Aborted { reason, .. } => tracing::warn!(
                feed_id = feed.id,
                feed = %feed.name,
                kind = reason.kind(),
                error = %reason,
                "Feed run aborted"
            ),
        }

        ProcessingResult::from_outcome(feed, outcome)
    }

    /// Runs the feed with the given id.
    ///
    /// Returns `Ok(None)` when the registry has no such feed. Inactive feeds
    /// are processed anyway; asking for one by id is explicit.
    ///
    /// # Errors
    ///
    /// [`IngestError::Registry`] if the lookup fails, or
    /// [`IngestError::Interrupted`] if the signal fires during it.
    pub async fn run_feed_by_id(
        &self,
        feed_id: i64,
        signal: &RunSignal,
    ) -> Result<Option<ProcessingResult>, IngestError> {
        let feed = signal
            .guard(self.registry.get_feed(feed_id))
            .await?
            .map_err(IngestError::Registry)?;

        match feed {
            Some(feed) => Ok(Some(self.run_feed(&feed, signal).await)),
            None => Ok(None),
        }
    }

    /// Runs every feed in `scope` with bounded concurrency.
    ///
    /// Results come back in the registry's listing order. A failed feed never
    /// stops the others.
    ///
    /// # Errors
    ///
    /// Only when the feed list itself cannot be read.
    pub async fn run_batch(
        &self,
        scope: BatchScope,
        signal: &RunSignal,
    ) -> Result<BatchResult, IngestError> {
        let feeds = signal
            .guard(self.registry.list_active_auto_fetch())
            .await?
            .map_err(IngestError::Registry)?;

        let now = Utc::now();
        let listed = feeds.len();
        let feeds: Vec<Feed> = match scope {
            BatchScope::All => feeds,
            BatchScope::Due => feeds.into_iter().filter(|f| f.is_due(now)).collect(),
        };

        tracing::info!(
            scope = ?scope,
            listed,
            selected = feeds.len(),
            concurrency = self.max_concurrent_feeds,
            "Starting batch run"
        );

        let results: Vec<ProcessingResult> = stream::iter(feeds)
            .map(|feed| async move { self.run_feed(&feed, signal).await })
            .buffered(self.max_concurrent_feeds)
            .collect()
            .await;

        let batch = BatchResult::from_results(results);
        tracing::info!(
            processed = batch.processed_feeds,
            total = batch.total_feeds,
            imported = batch.total_imported,
            skipped = batch.total_skipped,
            errors = batch.total_errors,
            "Batch run finished"
        );
        Ok(batch)
    }

    async fn execute(&self, feed: &Feed, signal: &RunSignal) -> RunOutcome {
        let mut counts = RunCounts::default();

        macro_rules! abort {
            ($reason:expr) => {
                return RunOutcome::Aborted {
                    counts,
                    reason: $reason.into(),
                }
            };
        }

        if let Err(interrupted) = signal.check() {
            abort!(interrupted);
        }

        let (url, category_id) = match validate(feed, self.host_policy) {
            Ok(valid) => valid,
            Err(reason) => abort!(reason),
        };

        let bytes = match self.fetcher.fetch(&url, signal).await {
            Ok(bytes) => bytes,
            Err(e) => abort!(e),
        };

        let parsed = match parse_feed(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => abort!(e),
        };
        counts.total = parsed.items.len();

        let existing = match signal.guard(self.store.existing_identities(feed.id)).await {
            Ok(Ok(existing)) => existing,
            Ok(Err(e)) => abort!(IngestError::Persistence(e)),
            Err(interrupted) => abort!(interrupted),
        };

        let mut dedup = DeduplicationFilter::new(existing);
        let sanitizer = ContentSanitizer::for_feed(parsed.link.as_deref(), url.as_str());
        let context = FeedContext {
            feed_id: feed.id,
            category_id,
            owner_id: feed.owner_id,
        };
        let now = Utc::now();

        for item in &parsed.items {
            if let Err(interrupted) = signal.check() {
                abort!(interrupted);
            }

            let identity = resolve_identity(item);
            if dedup.check(&identity) == DedupDecision::Skip {
                counts.skipped += 1;
                continue;
            }

            let article = match self
                .normalizer
                .normalize(item, identity.clone(), context, &sanitizer, now)
            {
                Ok(article) => article,
                Err(e) => {
                    counts.errors += 1;
                    let e = IngestError::from(e);
                    tracing::debug!(
                        feed_id = feed.id,
                        guid = %identity.value,
                        kind = e.kind(),
                        error = %e,
                        "Skipping unusable item"
                    );
                    continue;
                }
            };

            match self.persistence.persist(&article, &mut counts, signal).await {
                Ok(PersistOutcome::Stored(_) | PersistOutcome::Duplicate) => {
                    dedup.remember(&identity);
                }
                Ok(PersistOutcome::Failed) => {}
                Err(interrupted) => abort!(interrupted),
            }
        }

        match signal.guard(self.registry.mark_fetched(feed.id, Utc::now())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to record last fetch time");
            }
            Err(interrupted) => {
                tracing::warn!(
                    feed_id = feed.id,
                    reason = %interrupted,
                    "Last fetch time not recorded"
                );
            }
        }

        RunOutcome::Completed(counts)
    }
}

/// Checks that a feed can be fetched and stored: a valid source URL and a category.
fn validate(feed: &Feed, policy: HostPolicy) -> Result<(Url, i64), IngestError> {
    let raw = feed
        .url
        .as_deref()
        .ok_or_else(|| IngestError::Configuration("feed has no source URL".to_string()))?;
    let url = validate_feed_url(raw, policy)?;
    let category_id = feed
        .category_id
        .ok_or_else(|| IngestError::Configuration("feed has no category".to_string()))?;
    Ok((url, category_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, NewFeed};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <link>https://site.example/</link>
    <item><guid>1</guid><title>First</title><description>One</description></item>
    <item><guid>2</guid><title>Second</title><description>Two</description></item>
</channel></rss>"#;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            host_policy: HostPolicy::AllowPrivate,
            fetch_timeout: Duration::from_secs(5),
            ..PipelineSettings::default()
        }
    }

    async fn setup(
        url: Option<String>,
        category_id: Option<i64>,
    ) -> (Arc<Database>, Orchestrator, Feed) {
        let db = Arc::new(Database::open(":memory:").await.unwrap());
        let id = db
            .insert_feed(&NewFeed {
                name: "Test".into(),
                url,
                category_id,
                owner_id: None,
                active: true,
                auto_fetch: true,
                fetch_interval_minutes: 60,
            })
            .await
            .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        let orchestrator = Orchestrator::new(db.clone(), db.clone(), &settings()).unwrap();
        (db, orchestrator, feed)
    }

    async fn serve(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_run_feed_imports_and_marks_fetched() {
        let server = serve(TWO_ITEMS).await;
        let (db, orchestrator, feed) = setup(Some(format!("{}/feed", server.uri())), Some(1)).await;

        let result = orchestrator.run_feed(&feed, &RunSignal::unbounded()).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.new_articles, 2);
        assert_eq!(result.total_items, 2);
        assert_eq!(
            result.message,
            "Processed 2 items, added 2 new articles, skipped 0, with 0 errors."
        );

        let feed = db.get_feed(feed.id).await.unwrap().unwrap();
        assert!(feed.last_fetched.is_some());
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let server = serve(TWO_ITEMS).await;
        let (db, orchestrator, feed) = setup(Some(format!("{}/feed", server.uri())), Some(1)).await;

        orchestrator.run_feed(&feed, &RunSignal::unbounded()).await;
        let second = orchestrator.run_feed(&feed, &RunSignal::unbounded()).await;

        assert_eq!((second.new_articles, second.skipped, second.errors), (0, 2, 0));
        assert_eq!(db.count_articles(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_url_is_configuration_error() {
        let (db, orchestrator, feed) = setup(None, Some(1)).await;
        let result = orchestrator.run_feed(&feed, &RunSignal::unbounded()).await;

        assert!(!result.success);
        assert_eq!(result.errors, 1);
        assert!(result.message.starts_with("configuration error"), "{}", result.message);
        assert!(db.get_feed(feed.id).await.unwrap().unwrap().last_fetched.is_none());
    }

    #[tokio::test]
    async fn test_missing_category_is_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
            .expect(0)
            .mount(&server)
            .await;
        let (_db, orchestrator, feed) = setup(Some(format!("{}/feed", server.uri())), None).await;

        let result = orchestrator.run_feed(&feed, &RunSignal::unbounded()).await;
        assert!(!result.success);
        assert!(result.message.contains("no category"), "{}", result.message);
    }

    #[tokio::test]
    async fn test_private_host_rejected_by_default_policy() {
        let server = serve(TWO_ITEMS).await;
        let (db, _, feed) = setup(Some(format!("{}/feed", server.uri())), Some(1)).await;
        let strict =
            Orchestrator::new(db.clone(), db.clone(), &PipelineSettings::default()).unwrap();

        let result = strict.run_feed(&feed, &RunSignal::unbounded()).await;
        assert!(!result.success);
        assert!(result.message.starts_with("configuration error"), "{}", result.message);
    }

    #[tokio::test]
    async fn test_run_feed_by_id_unknown() {
        let (_db, orchestrator, _feed) = setup(None, Some(1)).await;
        let result = orchestrator
            .run_feed_by_id(999, &RunSignal::unbounded())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_touch_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
            .expect(0)
            .mount(&server)
            .await;
        let url = format!("{}/feed", server.uri());
        let (_db, orchestrator, feed) = setup(Some(url), Some(1)).await;

        let handle = crate::pipeline::CancelHandle::new();
        handle.cancel();
        let signal = RunSignal::unbounded().cancellable_by(&handle);

        let result = orchestrator.run_feed(&feed, &signal).await;
        assert!(!result.success);
        assert_eq!(result.message, "interrupted: run cancelled");
    }
}
