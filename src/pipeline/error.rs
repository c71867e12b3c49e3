use thiserror::Error;

use super::signal::Interrupted;
use crate::content::NormalizationError;
use crate::feed::{FetchError, ParseError};
use crate::storage::StoreError;
use crate::util::UrlValidationError;

/// Everything that can go wrong while ingesting a feed.
///
/// The orchestrator never lets one of these escape a feed run: run-level
/// variants end the run as a failed [`ProcessingResult`](super::ProcessingResult),
/// item-level variants are counted and the run continues.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The feed cannot be processed as configured (no URL, bad URL, no category)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(#[source] FetchError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("persistence error: {0}")]
    Persistence(#[source] StoreError),

    /// The store already holds this identity; counted as skipped
    #[error("duplicate item {guid:?}")]
    DuplicateSkip { guid: String },

    /// Reading or updating the feed registry failed
    #[error("registry error: {0}")]
    Registry(#[source] StoreError),

    #[error("interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl IngestError {
    /// Short machine-readable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Configuration(_) => "configuration",
            IngestError::Network(_) => "network",
            IngestError::Parse(_) => "parse",
            IngestError::Normalization(_) => "normalization",
            IngestError::Persistence(_) => "persistence",
            IngestError::DuplicateSkip { .. } => "duplicate",
            IngestError::Registry(_) => "registry",
            IngestError::Interrupted(_) => "interrupted",
        }
    }
}

impl From<FetchError> for IngestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Interrupted(reason) => IngestError::Interrupted(reason),
            other => IngestError::Network(other),
        }
    }
}

impl From<UrlValidationError> for IngestError {
    fn from(err: UrlValidationError) -> Self {
        IngestError::Configuration(format!("invalid feed URL: {err}"))
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { guid, .. } => IngestError::DuplicateSkip { guid },
            other => IngestError::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_store_error_maps_to_skip() {
        let err: IngestError = StoreError::Duplicate {
            feed_id: 1,
            guid: "g".into(),
        }
        .into();
        assert!(matches!(err, IngestError::DuplicateSkip { ref guid } if guid == "g"));
        assert_eq!(err.kind(), "duplicate");
    }

    #[test]
    fn test_other_store_error_maps_to_persistence() {
        let err: IngestError = StoreError::Rejected("nope".into()).into();
        assert_eq!(err.kind(), "persistence");
        assert_eq!(err.to_string(), "persistence error: article rejected by store: nope");
    }

    #[test]
    fn test_interrupted_fetch_is_not_a_network_error() {
        let err: IngestError = FetchError::Interrupted(Interrupted::DeadlineExceeded).into();
        assert_eq!(err.kind(), "interrupted");
        let err: IngestError = FetchError::ResponseTooLarge.into();
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn test_unusable_item_is_normalization() {
        let err = IngestError::from(NormalizationError::MissingTitle);
        assert!(matches!(err, IngestError::Normalization(NormalizationError::MissingTitle)));
        assert_eq!(err.kind(), "normalization");
    }

    #[test]
    fn test_url_error_is_configuration() {
        let err: IngestError = UrlValidationError::Empty.into();
        assert_eq!(err.kind(), "configuration");
    }
}
