pub mod error;
pub mod feed;
pub mod fetch;
pub mod poller;
pub mod storage;

pub use error::{PollError, StoreError};
pub use feed::{uuid_from_string, Article, Feed, Image};
pub use fetch::{FetchFailure, Fetched, Fetcher, ParsedFeed};
pub use poller::{Clock, PollConfig, Poller, SystemClock};
pub use storage::{InMemoryStorage, Storage};
