//! Feed retrieval and parsing.
//!
//! - **Fetching**: one bounded HTTP attempt per feed, no retries
//! - **Parsing**: RSS with its common namespaced extensions, plus Atom and
//!   RDF via `feed-rs`, reduced to [`RawFeedItem`]s
//!
//! Nothing in this module touches storage or cleans content; it hands raw
//! items to [`crate::content`].

mod fetcher;
mod parser;
mod types;

pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{parse_feed, ParseError};
pub use types::{Enclosure, MediaKind, MediaRef, ParsedFeed, RawFeedItem};
