//! Integration tests for the feed registry: config sync, listing, due
//! selection and fetch bookkeeping.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use feedmill::config::Config;
use feedmill::storage::{Database, FeedRegistry, NewFeed};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

const CONFIG: &str = r#"
[[feeds]]
name = "Alpha"
url = "https://alpha.example/rss"
category_id = 1

[[feeds]]
name = "Beta"
url = "https://beta.example/atom"
category_id = 2
owner_id = 42
fetch_interval_minutes = 15

[[feeds]]
name = "Paused"
url = "https://paused.example/rss"
category_id = 1
active = false

[[feeds]]
name = "Manual"
url = "https://manual.example/rss"
category_id = 1
auto_fetch = false
"#;

fn configured() -> Vec<NewFeed> {
    let config = Config::from_toml_str(CONFIG).unwrap();
    config.feeds.iter().map(NewFeed::from).collect()
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_sync_registers_configured_feeds() {
    let db = test_db().await;
    db.sync_feeds(&configured()).await.unwrap();

    let feeds = db.list_feeds().await.unwrap();
    let names: Vec<&str> = feeds.iter().map(|f| &*f.name).collect();
    assert_eq!(names, vec!["Alpha", "Beta", "Paused", "Manual"]);

    let beta = &feeds[1];
    assert_eq!(beta.url.as_deref(), Some("https://beta.example/atom"));
    assert_eq!(beta.category_id, Some(2));
    assert_eq!(beta.owner_id, Some(42));
    assert_eq!(beta.fetch_interval_minutes, 15);
    assert!(beta.last_fetched.is_none());
}

#[tokio::test]
async fn test_resync_updates_in_place_and_keeps_fetch_time() {
    let db = test_db().await;
    db.sync_feeds(&configured()).await.unwrap();
    let alpha = db.list_feeds().await.unwrap().remove(0);

    let fetched_at = Utc::now();
    db.mark_fetched(alpha.id, fetched_at).await.unwrap();

    let mut feeds = configured();
    feeds[0].name = "Alpha Renamed".to_string();
    feeds[0].category_id = Some(7);
    db.sync_feeds(&feeds).await.unwrap();

    let all = db.list_feeds().await.unwrap();
    assert_eq!(all.len(), 4);
    let alpha = db.get_feed(alpha.id).await.unwrap().unwrap();
    assert_eq!(&*alpha.name, "Alpha Renamed");
    assert_eq!(alpha.category_id, Some(7));
    assert_eq!(
        alpha.last_fetched.map(|t| t.timestamp()),
        Some(fetched_at.timestamp())
    );
}

#[tokio::test]
async fn test_sync_tolerates_repeated_url_in_config() {
    let toml = format!(
        r#"{CONFIG}
[[feeds]]
name = "Alpha Again"
url = "https://alpha.example/rss"
category_id = 3
"#
    );
    let config = Config::from_toml_str(&toml).unwrap();
    let feeds: Vec<NewFeed> = config.feeds.iter().map(NewFeed::from).collect();

    let db = test_db().await;
    db.sync_feeds(&feeds).await.unwrap();

    let all = db.list_feeds().await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(&*all[0].name, "Alpha Again");
    assert_eq!(all[0].category_id, Some(3));
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_batch_listing_excludes_inactive_and_manual() {
    let db = test_db().await;
    db.sync_feeds(&configured()).await.unwrap();

    let eligible = FeedRegistry::list_active_auto_fetch(&db).await.unwrap();
    let names: Vec<&str> = eligible.iter().map(|f| &*f.name).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
}

#[tokio::test]
async fn test_get_unknown_feed_is_none() {
    let db = test_db().await;
    assert!(FeedRegistry::get_feed(&db, 12345).await.unwrap().is_none());
}

#[tokio::test]
async fn test_feed_without_url_can_be_registered() {
    let db = test_db().await;
    let feed = NewFeed {
        name: "Placeholder".to_string(),
        url: None,
        category_id: None,
        owner_id: None,
        active: true,
        auto_fetch: true,
        fetch_interval_minutes: 60,
    };
    let a = db.insert_feed(&feed).await.unwrap();
    let b = db.insert_feed(&feed).await.unwrap();

    // NULL urls never collide
    assert_ne!(a, b);
    assert!(db.get_feed(a).await.unwrap().unwrap().url.is_none());
}

// ============================================================================
// Due selection and fetch bookkeeping
// ============================================================================

#[tokio::test]
async fn test_due_follows_interval() {
    let db = test_db().await;
    db.sync_feeds(&configured()).await.unwrap();
    let beta = db.list_feeds().await.unwrap().remove(1);
    let now = Utc::now();

    assert!(beta.is_due(now), "never fetched is always due");

    db.mark_fetched(beta.id, now - Duration::minutes(10))
        .await
        .unwrap();
    let beta = db.get_feed(beta.id).await.unwrap().unwrap();
    assert!(!beta.is_due(now));
    assert!(beta.is_due(now + Duration::minutes(5)));
}

#[tokio::test]
async fn test_mark_fetched_never_moves_backwards() {
    let db = test_db().await;
    db.sync_feeds(&configured()).await.unwrap();
    let alpha = db.list_feeds().await.unwrap().remove(0);

    let later = Utc::now();
    let earlier = later - Duration::hours(3);

    FeedRegistry::mark_fetched(&db, alpha.id, later).await.unwrap();
    FeedRegistry::mark_fetched(&db, alpha.id, earlier).await.unwrap();

    let alpha = db.get_feed(alpha.id).await.unwrap().unwrap();
    assert_eq!(
        alpha.last_fetched.map(|t| t.timestamp()),
        Some(later.timestamp())
    );
}
