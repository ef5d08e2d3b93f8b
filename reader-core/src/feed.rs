use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use url::Url;
use uuid::Uuid;

/// Derives a stable identifier from an arbitrary string.
///
/// An MD5 digest is 16 bytes, the same size as a UUID, so the digest is
/// used as one directly. Identifiers are therefore portable across runs
/// and across clients that hash the same strings.
pub fn uuid_from_string(s: &str) -> Uuid {
    let digest = md5::compute(s.as_bytes());
    Uuid::from_bytes(digest.0)
}

/// A periodically refreshed syndication source.
///
/// The configured URL is the feed's identity; everything else is filled
/// in from fetch results. `modified_at` starts at the Unix epoch so the
/// first scheduled fetch fires immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub feed_link: Url,
    pub modified_at: DateTime<Utc>,
    pub title: String,
    pub link: String,
}

impl Feed {
    pub fn new(feed_link: Url) -> Self {
        Self {
            feed_link,
            modified_at: DateTime::UNIX_EPOCH,
            title: String::new(),
            link: String::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        uuid_from_string(self.link_str())
    }

    /// The feed link as hashed and served. Parsing an authority-only
    /// URL appends a root path; that slash is not part of the
    /// configured URL, so it is stripped before the string is hashed
    /// or rendered. `https://example.com` keeps its identifier no
    /// matter which side of the parser it is on.
    fn link_str(&self) -> &str {
        let raw = self.feed_link.as_str();
        if self.feed_link.path() == "/"
            && self.feed_link.query().is_none()
            && self.feed_link.fragment().is_none()
        {
            raw.strip_suffix('/').unwrap_or(raw)
        } else {
            raw
        }
    }
}

impl Serialize for Feed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Feed", 5)?;
        state.serialize_field("UUID", &self.uuid())?;
        state.serialize_field("FeedLink", self.link_str())?;
        state.serialize_field("ModifiedAt", &self.modified_at)?;
        state.serialize_field("Title", &self.title)?;
        state.serialize_field("Link", &self.link)?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "URL")]
    pub url: String,
}

/// One item from a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// Source-provided identifier. Not serialized; the derived UUID
    /// stands in for it.
    pub guid: Option<String>,
    pub link: String,
    pub published: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub image: Option<Image>,
}

impl Article {
    /// Identity prefers the GUID when the source supplies a non-empty
    /// one, otherwise the link. A changed GUID is a new article.
    pub fn uuid(&self) -> Uuid {
        match self.guid.as_deref() {
            Some(guid) if !guid.is_empty() => uuid_from_string(guid),
            _ => uuid_from_string(&self.link),
        }
    }
}

impl Serialize for Article {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Article", 6)?;
        state.serialize_field("Link", &self.link)?;
        state.serialize_field("Published", &self.published)?;
        state.serialize_field("Title", &self.title)?;
        state.serialize_field("Description", &self.description)?;
        state.serialize_field("Image", &self.image)?;
        state.serialize_field("UUID", &self.uuid())?;
        state.end()
    }
}
