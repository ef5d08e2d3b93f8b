use std::io::Cursor;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::{CACHE_CONTROL, IF_MODIFIED_SINCE};
use reqwest::{Client, StatusCode};

use crate::error::PollError;
use crate::feed::{Article, Feed, Image};

const MAX_FEED_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

/// RFC 1123 rendering used for the If-Modified-Since request header.
const IF_MODIFIED_SINCE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Fetches a single feed over HTTP.
///
/// Every fetch produces a next delay, success or not, derived from the
/// server's Cache-Control response header and the configured retry
/// delays. The caller schedules the next fetch from it.
pub struct Fetcher {
    client: Client,
    retry: Duration,
    retry_not_modified: Duration,
    retry_after_error: Duration,
}

/// Successful fetch: a parseable body plus the delay before the feed
/// should be fetched again.
#[derive(Debug)]
pub struct Fetched {
    pub parsed: ParsedFeed,
    pub next_delay: Duration,
}

/// Failed fetch. The delay is always populated so a broken feed keeps
/// cycling instead of falling out of the schedule.
#[derive(Debug)]
pub struct FetchFailure {
    pub error: PollError,
    pub next_delay: Duration,
}

#[derive(Debug)]
pub enum ParsedFeed {
    Rss(rss::Channel),
    Atom(atom_syndication::Feed),
}

impl Fetcher {
    pub fn new(
        client: Client,
        retry: Duration,
        retry_not_modified: Duration,
        retry_after_error: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            retry_not_modified,
            retry_after_error,
        }
    }

    /// Issues a conditional GET for the feed and maps the outcome.
    ///
    /// The If-Modified-Since header carries the feed's last fetch
    /// instant so well-behaved servers can answer 304. A positive
    /// `max-age` response directive overrides the plain retry delay; a
    /// malformed Cache-Control header leaves the error delay in place.
    pub async fn fetch(&self, feed: &Feed) -> Result<Fetched, FetchFailure> {
        let mut next_delay = self.retry_after_error;

        let modified_at = feed
            .modified_at
            .format(IF_MODIFIED_SINCE_FORMAT)
            .to_string();

        let response = match self
            .client
            .get(feed.feed_link.clone())
            .header(IF_MODIFIED_SINCE, modified_at)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return Err(FetchFailure {
                    error: PollError::Network(err),
                    next_delay,
                })
            }
        };

        let cache_control = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if let Some(directives) = parse_response_directives(cache_control) {
            match directives.max_age {
                Some(max_age) if max_age > 0 => next_delay = Duration::from_secs(max_age),
                _ => next_delay = self.retry,
            }
        }

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::NOT_MODIFIED {
                // A 304 backs off at least to the configured floor, but
                // a larger max-age still wins.
                if self.retry_not_modified > next_delay {
                    next_delay = self.retry_not_modified;
                }

                return Err(FetchFailure {
                    error: PollError::NotModified,
                    next_delay,
                });
            }

            return Err(FetchFailure {
                error: PollError::Http(status),
                next_delay,
            });
        }

        let body = match self.read_body(response).await {
            Ok(body) => body,
            Err(error) => return Err(FetchFailure { error, next_delay }),
        };

        match parse_feed(&body) {
            Ok(parsed) => Ok(Fetched { parsed, next_delay }),
            Err(error) => Err(FetchFailure { error, next_delay }),
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<Bytes, PollError> {
        if let Some(len) = response.content_length() {
            if len > MAX_FEED_BYTES as u64 {
                return Err(PollError::TooLarge(len));
            }
        }

        let mut buf = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > MAX_FEED_BYTES {
                return Err(PollError::TooLarge((buf.len() + chunk.len()) as u64));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }
}

fn parse_feed(body: &[u8]) -> Result<ParsedFeed, PollError> {
    match rss::Channel::read_from(Cursor::new(body)) {
        Ok(channel) => Ok(ParsedFeed::Rss(channel)),
        Err(rss_err) => match atom_syndication::Feed::read_from(Cursor::new(body)) {
            Ok(feed) => Ok(ParsedFeed::Atom(feed)),
            // Report the RSS error; most configured feeds are RSS.
            Err(_) => Err(PollError::Parse(rss_err)),
        },
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ResponseDirectives {
    max_age: Option<u64>,
}

/// Parses the response Cache-Control directives we care about. Returns
/// `None` when the header is malformed.
fn parse_response_directives(value: &str) -> Option<ResponseDirectives> {
    let mut directives = ResponseDirectives::default();

    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (name, argument) = match part.split_once('=') {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (part, None),
        };

        if name.eq_ignore_ascii_case("max-age") {
            let argument = argument?;
            let seconds = argument.trim_matches('"').parse::<u64>().ok()?;
            directives.max_age = Some(seconds);
        }
    }

    Some(directives)
}

impl ParsedFeed {
    /// Copies the parsed channel metadata onto the feed record and maps
    /// every item to a canonical article.
    pub fn apply_to(&self, feed: &mut Feed) -> Vec<Article> {
        match self {
            ParsedFeed::Rss(channel) => {
                feed.title = channel.title().to_string();
                feed.link = channel.link().to_string();

                channel.items().iter().map(article_from_rss_item).collect()
            }
            ParsedFeed::Atom(atom) => {
                feed.title = atom.title().value.clone();
                feed.link = atom
                    .links()
                    .first()
                    .map(|link| link.href.clone())
                    .unwrap_or_default();

                atom.entries().iter().map(article_from_atom_entry).collect()
            }
        }
    }
}

fn article_from_rss_item(item: &rss::Item) -> Article {
    let published = item
        .pub_date()
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH);

    // Prefer the item-level image when one was parsed; otherwise fall
    // back to a media:thumbnail tag with a url attribute.
    let image = item
        .itunes_ext()
        .and_then(|itunes| itunes.image())
        .map(|url| Image {
            title: String::new(),
            url: url.to_string(),
        })
        .or_else(|| media_thumbnail(item));

    Article {
        guid: item.guid().map(|guid| guid.value().to_string()),
        link: item.link().unwrap_or_default().to_string(),
        published,
        title: item.title().unwrap_or_default().to_string(),
        description: item.description().unwrap_or_default().to_string(),
        image,
    }
}

fn media_thumbnail(item: &rss::Item) -> Option<Image> {
    let thumbnails = item.extensions().get("media")?.get("thumbnail")?;
    let url = thumbnails.first()?.attrs.get("url")?;

    Some(Image {
        title: "Thumbnail".to_string(),
        url: url.clone(),
    })
}

fn article_from_atom_entry(entry: &atom_syndication::Entry) -> Article {
    let published = entry
        .published()
        .copied()
        .unwrap_or_else(|| *entry.updated())
        .with_timezone(&Utc);

    Article {
        guid: Some(entry.id().to_string()),
        link: entry
            .links()
            .first()
            .map(|link| link.href.clone())
            .unwrap_or_default(),
        published,
        title: entry.title().value.clone(),
        description: entry
            .summary()
            .map(|summary| summary.value.clone())
            .unwrap_or_default(),
        image: None,
    }
}
