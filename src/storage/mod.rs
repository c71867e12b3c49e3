mod articles;
mod feeds;
mod schema;
mod traits;
mod types;

pub use schema::Database;
pub use traits::{ArticleStore, FeedRegistry};
pub use types::{Article, Feed, NewFeed, NormalizedArticle, StoreError};
