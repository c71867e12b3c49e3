//! feedmill: polls RSS/Atom feeds and stores normalized, deduplicated articles.

pub mod config;
pub mod content;
pub mod feed;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod util;
