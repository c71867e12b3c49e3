//! The ingestion pipeline.
//!
//! A feed run goes `validate → fetch → parse → [dedup → normalize → persist]*
//! → mark fetched`. Run-level failures abort the run; item-level failures are
//! counted and skipped. Every run, successful or not, ends in a
//! [`ProcessingResult`].

mod dedup;
mod error;
mod orchestrator;
mod persist;
mod result;
mod signal;

use std::time::Duration;

use crate::util::HostPolicy;

pub use dedup::{DedupDecision, DeduplicationFilter};
pub use error::IngestError;
pub use orchestrator::{BatchScope, Orchestrator};
pub use persist::{PersistOutcome, PersistenceCoordinator};
pub use result::{BatchResult, ProcessingResult, RunCounts, RunOutcome};
pub use signal::{CancelHandle, Interrupted, RunSignal};

/// Tunables shared by every run an [`Orchestrator`] performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub user_agent: String,
    pub fetch_timeout: Duration,
    /// Summary length in characters, ellipsis included
    pub summary_max_length: usize,
    pub max_concurrent_feeds: usize,
    pub host_policy: HostPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("feedmill/", env!("CARGO_PKG_VERSION")).to_string(),
            fetch_timeout: Duration::from_secs(30),
            summary_max_length: 200,
            max_concurrent_feeds: 4,
            host_policy: HostPolicy::PublicOnly,
        }
    }
}
