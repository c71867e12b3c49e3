//! Utility functions shared by the pipeline stages.
//!
//! - **URL validation**: feed URLs are checked before any fetch is attempted
//! - **Text processing**: word-boundary truncation and diagnostic excerpts

mod text;
mod url_validator;

pub use text::{excerpt, strip_control_chars, truncate_at_word, ELLIPSIS};
pub use url_validator::{site_origin, validate_feed_url, HostPolicy, UrlValidationError};
