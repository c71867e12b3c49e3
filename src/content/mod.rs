//! Turning raw feed items into clean, storable articles.
//!
//! - [`ContentSanitizer`] cleans HTML and resolves URLs against the feed's site
//! - [`ItemNormalizer`] picks the image, summary, author, date and tags
//! - [`resolve_identity`] gives every item a stable key for deduplication

mod normalizer;
mod sanitizer;

pub use normalizer::{
    resolve_identity, FeedContext, IdentitySource, ItemIdentity, ItemNormalizer,
    NormalizationError, UNKNOWN_AUTHOR,
};
pub use sanitizer::{decode_entities, first_img_src, repair_url, text_content, ContentSanitizer};
