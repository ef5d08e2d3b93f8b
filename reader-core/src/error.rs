use reqwest::StatusCode;
use thiserror::Error;

/// Per-feed failure reported on the poller's error stream.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("http error: {0}")]
    Http(StatusCode),
    #[error("304 not modified")]
    NotModified,
    #[error("feed parsing error: {0}")]
    Parse(#[from] rss::Error),
    #[error("feed body too large: {0} bytes")]
    TooLarge(u64),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("feed not found")]
    FeedNotFound,
    #[error("article not found")]
    ArticleNotFound,
}
