//! Cached activity feed.
//!
//! The home page shows a merged feed of recent posts, notes and repository
//! events. Building it means calling several upstream sources, so the merged
//! list is kept in the `activity-feed` namespace and rebuilt on a miss.

use std::future::Future;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::{CacheNamespace, VersionedCache};
use crate::store::SharedStore;

/// Key of the merged feed inside the namespace.
pub const FEED_KEY: &str = "feed:all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Blog,
    Github,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: String,
    pub source: ActivitySource,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// The activity feed on top of a [`VersionedCache`].
#[derive(Clone)]
pub struct ActivityFeedCache {
    cache: VersionedCache<Vec<ActivityItem>>,
}

impl ActivityFeedCache {
    pub fn new(store: SharedStore) -> Self {
        let cache = VersionedCache::for_namespace(CacheNamespace::ActivityFeed, store)
            .with_validator(|items: &Vec<ActivityItem>| {
                items.iter().all(|item| !item.id.trim().is_empty())
            });
        Self { cache }
    }

    pub fn cache(&self) -> &VersionedCache<Vec<ActivityItem>> {
        &self.cache
    }

    pub async fn feed(&self) -> Option<Vec<ActivityItem>> {
        self.cache.get(FEED_KEY).await
    }

    /// Store `items`, newest first.
    pub async fn store_feed(&self, mut items: Vec<ActivityItem>) -> bool {
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.cache.set(FEED_KEY, &items, None).await
    }

    pub async fn invalidate(&self) -> bool {
        self.cache.delete(FEED_KEY).await
    }

    /// The cached feed, or the output of `build` (newest first) stored for next time.
    pub async fn feed_or_build<F, Fut, E>(&self, build: F) -> Result<Vec<ActivityItem>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ActivityItem>, E>>,
    {
        self.cache
            .get_or_insert_with(FEED_KEY, move || async move {
                let mut items = build().await?;
                items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                Ok::<_, E>(items)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::store::{Connector, MemoryConnector};

    async fn feed_cache(connector: &MemoryConnector) -> ActivityFeedCache {
        let established = connector.connect("memory://feed").await.expect("connect");
        ActivityFeedCache::new(established.client)
    }

    fn item(id: &str, source: ActivitySource, timestamp: OffsetDateTime) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            source,
            timestamp,
        }
    }

    #[tokio::test]
    async fn stores_newest_first() {
        let connector = MemoryConnector::new();
        let feed = feed_cache(&connector).await;
        let older = item("n1", ActivitySource::Note, datetime!(2026-01-01 00:00:00 UTC));
        let newer = item("g1", ActivitySource::Github, datetime!(2026-01-02 00:00:00 UTC));

        assert!(feed.store_feed(vec![older.clone(), newer.clone()]).await);

        assert_eq!(feed.feed().await, Some(vec![newer, older]));
        assert!(connector.store().contains("activity-feed:v2:feed:all"));
    }

    #[tokio::test]
    async fn rejects_items_without_ids() {
        let connector = MemoryConnector::new();
        let feed = feed_cache(&connector).await;

        feed.store_feed(vec![item(" ", ActivitySource::Blog, datetime!(2026-01-01 00:00:00 UTC))])
            .await;

        assert_eq!(feed.feed().await, None);
        assert!(connector.store().is_empty());
    }

    #[tokio::test]
    async fn builds_on_miss_only() {
        let connector = MemoryConnector::new();
        let feed = feed_cache(&connector).await;
        let stamp = datetime!(2026-01-01 00:00:00 UTC);

        let built: Result<_, String> = feed
            .feed_or_build(|| async { Ok(vec![item("a1", ActivitySource::Blog, stamp)]) })
            .await;
        assert_eq!(built.as_ref().map(Vec::len), Ok(1));

        let cached: Result<_, String> = feed
            .feed_or_build(|| async { Err("should not rebuild".to_string()) })
            .await;
        assert_eq!(cached, built);

        assert!(feed.invalidate().await);
        assert_eq!(feed.feed().await, None);
    }

    #[test]
    fn item_serializes_source_and_rfc3339_timestamp() {
        let json = serde_json::to_value(item(
            "a1",
            ActivitySource::Github,
            datetime!(2026-01-01 00:00:00 UTC),
        ))
        .expect("item serializes");
        assert_eq!(json["source"], "github");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00Z");
    }
}
