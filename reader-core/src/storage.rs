use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::feed::{Article, Feed};

/// Repository contract shared by the poller (writer) and the read API
/// (reader). Implementations must be safe under arbitrary interleaving
/// of callers.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or updates the feed and upserts the given articles under
    /// it. Articles absent from this call are kept; the store only
    /// accumulates.
    async fn store(&self, feed: Feed, articles: Vec<Article>) -> Result<(), StoreError>;

    /// All known feeds, sorted ascending by title.
    async fn feeds(&self) -> Result<Vec<Feed>, StoreError>;

    /// Articles across all feeds published strictly before `offset`,
    /// newest first.
    async fn latest(&self, offset: DateTime<Utc>) -> Result<Vec<Article>, StoreError>;

    /// As [`Storage::latest`], restricted to one feed.
    async fn latest_from_feed(
        &self,
        feed: Uuid,
        offset: DateTime<Utc>,
    ) -> Result<Vec<Article>, StoreError>;

    /// Looks an article up by identity across every feed.
    async fn article(&self, article: Uuid) -> Result<Article, StoreError>;
}

/// Process-lifetime storage backed by nested hash maps.
pub struct InMemoryStorage {
    feeds: RwLock<HashMap<Uuid, Feed>>,
    articles: RwLock<HashMap<Uuid, HashMap<Uuid, Article>>>,

    /// Minimum number of articles returned by the latest queries.
    /// Minimum, not maximum: a page keeps growing past it while the
    /// articles at the boundary share a publication time, so time-based
    /// pagination never splits them across pages.
    min_latest: usize,
}

impl InMemoryStorage {
    pub fn new(min_latest: usize) -> Self {
        let min_latest = if min_latest == 0 { 10 } else { min_latest };

        Self {
            feeds: RwLock::new(HashMap::new()),
            articles: RwLock::new(HashMap::new()),
            min_latest,
        }
    }

    fn latest_page(&self, mut articles: Vec<Article>, offset: DateTime<Utc>) -> Vec<Article> {
        articles.sort_by(|a, b| b.published.cmp(&a.published));

        let mut page = Vec::new();

        for (i, article) in articles.iter().enumerate() {
            // Published at or after the offset means the article belongs
            // to an earlier page.
            if article.published >= offset {
                continue;
            }

            page.push(article.clone());

            // Grab every article that continues with the same published
            // time before the minimum is taken into account.
            if let Some(next) = articles.get(i + 1) {
                if next.published == article.published {
                    continue;
                }
            }

            if page.len() > self.min_latest - 1 {
                break;
            }
        }

        page
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store(&self, feed: Feed, articles: Vec<Article>) -> Result<(), StoreError> {
        let id = feed.uuid();

        self.feeds.write().await.insert(id, feed);

        let mut map = self.articles.write().await;
        let partition = map.entry(id).or_default();
        for article in articles {
            partition.insert(article.uuid(), article);
        }

        Ok(())
    }

    async fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let mut feeds: Vec<Feed> = self.feeds.read().await.values().cloned().collect();
        feeds.sort_by(|a, b| a.title.cmp(&b.title));

        Ok(feeds)
    }

    async fn latest(&self, offset: DateTime<Utc>) -> Result<Vec<Article>, StoreError> {
        let articles: Vec<Article> = self
            .articles
            .read()
            .await
            .values()
            .flat_map(|partition| partition.values().cloned())
            .collect();

        Ok(self.latest_page(articles, offset))
    }

    async fn latest_from_feed(
        &self,
        feed: Uuid,
        offset: DateTime<Utc>,
    ) -> Result<Vec<Article>, StoreError> {
        let map = self.articles.read().await;
        let partition = map.get(&feed).ok_or(StoreError::FeedNotFound)?;
        let articles: Vec<Article> = partition.values().cloned().collect();
        drop(map);

        Ok(self.latest_page(articles, offset))
    }

    async fn article(&self, article: Uuid) -> Result<Article, StoreError> {
        let map = self.articles.read().await;

        map.values()
            .find_map(|partition| partition.get(&article).cloned())
            .ok_or(StoreError::ArticleNotFound)
    }
}
