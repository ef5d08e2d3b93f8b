use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PollError;
use crate::feed::Feed;
use crate::fetch::Fetcher;
use crate::storage::Storage;

/// Source of the current instant. Delay math and `modified_at` stamps
/// go through this so tests can substitute a frozen clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Poller configuration. Field defaults apply individually, so a caller
/// overrides only what it needs:
///
/// ```
/// use reader_core::poller::PollConfig;
///
/// let config = PollConfig {
///     workers: 2,
///     ..PollConfig::default()
/// };
/// ```
#[derive(Clone)]
pub struct PollConfig {
    /// Fixed worker count; 0 is coerced to 1.
    pub workers: usize,
    /// Delay between successful fetches when the server's Cache-Control
    /// header is absent or silent.
    pub retry: Duration,
    /// Minimum delay after a 304 Not Modified.
    pub retry_not_modified: Duration,
    /// Delay after a transport, HTTP or parse failure.
    pub retry_after_error: Duration,
    /// Outbound HTTP client, shared by all workers.
    pub client: Client,
    pub clock: Arc<dyn Clock>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            retry: Duration::from_secs(60),
            retry_not_modified: Duration::from_secs(120),
            retry_after_error: Duration::from_secs(300),
            client: Client::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

struct QueuedFeed {
    feed: Feed,
    delay: Duration,
}

/// Long-running refresh pipeline over a set of feeds.
///
/// Feeds cycle through two channels: a queued channel of (feed, delay)
/// pairs scheduled relative to the feed's last fetch, and a ready
/// channel of feeds whose delay has elapsed. A staging dispatcher moves
/// entries from queued to ready through one cheap waiter task per
/// entry; a fixed pool of workers fetches ready feeds, stores the
/// results and re-enqueues each feed with the delay its fetch produced.
pub struct Poller {
    store: Arc<dyn Storage>,
    fetcher: Arc<Fetcher>,
    workers: usize,
    retry: Duration,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(store: Arc<dyn Storage>, config: PollConfig) -> Self {
        let fetcher = Fetcher::new(
            config.client,
            config.retry,
            config.retry_not_modified,
            config.retry_after_error,
        );

        Self {
            store,
            fetcher: Arc::new(fetcher),
            workers: config.workers.max(1),
            retry: config.retry,
            clock: config.clock,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawns the pipeline and returns its error stream.
    ///
    /// Every per-feed failure is sent on the stream and the feed is
    /// re-enqueued; nothing is ever dropped from the schedule. The
    /// stream closes once `token` is cancelled and every worker has
    /// stopped producing.
    pub fn run(&self, token: CancellationToken, feeds: Vec<Feed>) -> mpsc::Receiver<PollError> {
        let (err_tx, err_rx) = mpsc::channel::<PollError>(1);
        // Sized to the initial list: the pipeline holds at most one
        // queued entry per live feed, so re-enqueues never block a
        // worker while the dispatcher is busy.
        let (queued_tx, mut queued_rx) = mpsc::channel::<QueuedFeed>(feeds.len().max(1));
        let (ready_tx, ready_rx) = mpsc::channel::<Feed>(1);

        for feed in feeds {
            queued_tx
                .try_send(QueuedFeed {
                    feed,
                    delay: self.retry,
                })
                .expect("queued channel sized for the initial feed list");
        }

        // Staging dispatcher. Waiter tasks are cheap, so each queued
        // entry gets one that sleeps out the delay and forwards the
        // feed; the dispatcher itself never blocks on a full ready
        // channel.
        {
            let token = token.clone();
            let clock = self.clock.clone();
            tokio::spawn(async move {
                loop {
                    let queued = tokio::select! {
                        _ = token.cancelled() => break,
                        queued = queued_rx.recv() => match queued {
                            Some(queued) => queued,
                            None => break,
                        },
                    };

                    let ready_tx = ready_tx.clone();
                    let token = token.clone();
                    let clock = clock.clone();
                    tokio::spawn(async move {
                        let elapsed = (clock.now() - queued.feed.modified_at)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        let wake = queued.delay.saturating_sub(elapsed);
                        debug!(feed = %queued.feed.uuid(), wake = ?wake, "queuing feed");

                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = tokio::time::sleep(wake) => {}
                        }

                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = ready_tx.send(queued.feed) => {}
                        }
                    });
                }
            });
        }

        let ready_rx = Arc::new(Mutex::new(ready_rx));
        for worker in 0..self.workers {
            let ready_rx = ready_rx.clone();
            let queued_tx = queued_tx.clone();
            let err_tx = err_tx.clone();
            let token = token.clone();
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let clock = self.clock.clone();

            tokio::spawn(async move {
                loop {
                    let feed = {
                        let mut ready = ready_rx.lock().await;
                        tokio::select! {
                            _ = token.cancelled() => None,
                            feed = ready.recv() => feed,
                        }
                    };
                    let Some(mut feed) = feed else { break };

                    // Cancellation drops the in-flight request.
                    let result = tokio::select! {
                        _ = token.cancelled() => break,
                        result = fetcher.fetch(&feed) => result,
                    };

                    feed.modified_at = clock.now();

                    match result {
                        Err(failure) => {
                            let delay = failure.next_delay;
                            let _ = queued_tx.send(QueuedFeed { feed, delay }).await;
                            let _ = err_tx.send(failure.error).await;
                        }
                        Ok(fetched) => {
                            let articles = fetched.parsed.apply_to(&mut feed);
                            let delay = fetched.next_delay;

                            match store.store(feed.clone(), articles).await {
                                Err(err) => {
                                    let _ = queued_tx.send(QueuedFeed { feed, delay }).await;
                                    let _ = err_tx.send(PollError::Store(err)).await;
                                }
                                Ok(()) => {
                                    let _ = queued_tx.send(QueuedFeed { feed, delay }).await;
                                }
                            }
                        }
                    }
                }

                debug!(worker, "poller worker stopped");
            });
        }

        err_rx
    }
}
