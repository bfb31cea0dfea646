#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by the server and the CLI

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use headers::{Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
pub use url::Url;

pub const API_ENDPOINT: &str = "/api";

/// Path prefix of the human-facing share links handed out on creation.
pub const SHARE_ENDPOINT: &str = "/p";

/// Body of `POST /api/pastes`.
///
/// Fields are kept as raw JSON so that the server, not the deserializer,
/// decides what counts as a bad request. An explicit `null` is the same as an
/// absent field.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CreatePaste {
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_views: Option<Value>,
}

impl CreatePaste {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Some(Value::String(content.into())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds.into());
        self
    }

    #[must_use]
    pub fn max_views(mut self, max_views: u32) -> Self {
        self.max_views = Some(max_views.into());
        self
    }
}

/// Response of a successful `POST /api/pastes`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedPaste {
    pub id: String,
    pub url: String,
}

/// Response of a successful `GET /api/pastes/:id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteView {
    pub content: String,
    /// Views left after the read that produced this response. `None` means
    /// unlimited.
    pub remaining_views: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Display for PasteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.remaining_views {
            Some(0) => write!(f, "This was the last view of this paste.")?,
            Some(1) => write!(f, "This paste can be viewed 1 more time.")?,
            Some(n) => write!(f, "This paste can be viewed {n} more times.")?,
            None => write!(f, "This paste has no view limit.")?,
        }

        match self.expires_at {
            Some(time) => write!(
                f,
                " {}",
                time.format("It will expire on %A, %B %-d, %Y at %T %Z.")
            ),
            None => write!(f, " It will not expire."),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
}

lazy_static! {
    pub static ref TEST_NOW_HEADER_NAME: HeaderName = HeaderName::from_static("x-test-now-ms");
}

/// Overrides the server clock for a single request, in milliseconds since the
/// Unix epoch. Only honoured by servers running in test mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestNow(pub i64);

impl Header for TestNow {
    fn name() -> &'static HeaderName {
        &TEST_NOW_HEADER_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .ok_or_else(headers::Error::invalid)?
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Self)
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, container: &mut E) {
        container.extend(std::iter::once(HeaderValue::from(self.0)));
    }
}

/// A paste link, either the share link (`/p/<id>`) or the API link
/// (`/api/pastes/<id>`), reduced to the API URL to fetch it from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasteUrl {
    pub api_url: Url,
    pub id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseUrlError {
    #[error("The provided url was bad")]
    BadUrl,
    #[error("The url does not point to a paste")]
    NotAPaste,
}

impl FromStr for PasteUrl {
    type Err = ParseUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut url = Url::from_str(s).map_err(|_| ParseUrlError::BadUrl)?;

        let segments: Vec<_> = url
            .path_segments()
            .ok_or(ParseUrlError::BadUrl)?
            .filter(|segment| !segment.is_empty())
            .collect();

        let id = match segments.as_slice() {
            ["p", id] | ["api", "pastes", id] => (*id).to_string(),
            _ => return Err(ParseUrlError::NotAPaste),
        };

        url.set_fragment(None);
        url.set_query(None);
        url.set_path(&format!("{API_ENDPOINT}/pastes/{id}"));

        Ok(Self { api_url: url, id })
    }
}
