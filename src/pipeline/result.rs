use serde::Serialize;

use super::error::IngestError;
use crate::storage::Feed;

/// Per-item tallies for one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Items in the parsed payload
    pub total: usize,
    pub new: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Terminal state of a feed run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every item was examined; counts are final
    Completed(RunCounts),
    /// The run stopped early; `counts` holds whatever was tallied first
    Aborted { counts: RunCounts, reason: IngestError },
}

/// Outcome of one feed run, as returned to triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub feed_id: i64,
    pub feed_name: String,
    pub success: bool,
    #[serde(rename = "imported")]
    pub new_articles: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_items: usize,
    pub message: String,
}

impl ProcessingResult {
    pub fn from_outcome(feed: &Feed, outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed(counts) => Self {
                feed_id: feed.id,
                feed_name: feed.name.to_string(),
                success: true,
                new_articles: counts.new,
                skipped: counts.skipped,
                errors: counts.errors,
                total_items: counts.total,
                message: format!(
                    "Processed {} items, added {} new articles, skipped {}, with {} errors.",
                    counts.total, counts.new, counts.skipped, counts.errors
                ),
            },
            RunOutcome::Aborted { counts, reason } => Self {
                feed_id: feed.id,
                feed_name: feed.name.to_string(),
                success: false,
                new_articles: counts.new,
                skipped: counts.skipped,
                // The abort itself counts as an error
                errors: counts.errors + 1,
                total_items: counts.total,
                message: reason.to_string(),
            },
        }
    }
}

/// Aggregate over a batch of feed runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Feed runs that completed
    pub processed_feeds: usize,
    pub total_feeds: usize,
    pub total_imported: usize,
    pub total_skipped: usize,
    pub total_errors: usize,
    /// One entry per feed, in the order the feeds were listed
    pub results: Vec<ProcessingResult>,
    pub message: String,
}

impl BatchResult {
    pub fn from_results(results: Vec<ProcessingResult>) -> Self {
        let processed_feeds = results.iter().filter(|r| r.success).count();
        let total_imported = results.iter().map(|r| r.new_articles).sum();
        let total_skipped = results.iter().map(|r| r.skipped).sum();
        let total_errors = results.iter().map(|r| r.errors).sum();
        let total_feeds = results.len();

        Self {
            processed_feeds,
            total_feeds,
            total_imported,
            total_skipped,
            total_errors,
            message: format!(
                "Processed {processed_feeds} of {total_feeds} feeds, imported {total_imported} articles."
            ),
            results,
        }
    }
}
