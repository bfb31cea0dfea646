use chrono::{TimeZone, Utc};
use fleeting_common::CreatePaste;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// A stored paste, as persisted by every backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub content: String,
    pub created_at: Millis,
    pub expires_at: Option<Millis>,
    pub remaining_views: Option<u32>,
    pub max_views: Option<u32>,
}

impl Paste {
    /// Builds the record for `draft` created at `now`.
    ///
    /// Fails if the deadline does not fit in an `i64` or lies outside the
    /// range of timestamps a client can be shown.
    pub fn new(id: String, draft: NewPaste, now: Millis) -> Result<Self, ValidationError> {
        let expires_at = draft
            .ttl_ms
            .map(|ttl| {
                now.checked_add(ttl)
                    .filter(|&deadline| Utc.timestamp_millis_opt(deadline).single().is_some())
                    .ok_or(ValidationError::TtlSeconds)
            })
            .transpose()?;

        Ok(Self {
            id,
            content: draft.content,
            created_at: now,
            expires_at,
            remaining_views: draft.max_views,
            max_views: draft.max_views,
        })
    }

    /// Whether the paste can still be read at `now`.
    ///
    /// Both the deadline and the view budget are checked against the same
    /// `now`. A paste whose deadline equals `now` is already dead.
    pub fn is_alive(&self, now: Millis) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
            && self.remaining_views.map_or(true, |views| views > 0)
    }

    /// The paste as it is stored after one successful read.
    #[must_use]
    pub fn after_read(&self) -> Self {
        Self {
            remaining_views: next_remaining_views(self.remaining_views),
            ..self.clone()
        }
    }
}

/// View budget left after a read. Unlimited budgets stay unlimited; a budget
/// never drops below zero.
pub const fn next_remaining_views(remaining_views: Option<u32>) -> Option<u32> {
    match remaining_views {
        Some(views) => Some(views.saturating_sub(1)),
        None => None,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("content is required and must be a non-empty string")]
    Content,
    #[error("ttl_seconds must be an integer >= 1")]
    TtlSeconds,
    #[error("max_views must be an integer >= 1")]
    MaxViews,
    #[error("request body must be a JSON object: {0}")]
    Body(String),
}

/// A validated creation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPaste {
    pub content: String,
    pub ttl_ms: Option<Millis>,
    pub max_views: Option<u32>,
}

impl TryFrom<CreatePaste> for NewPaste {
    type Error = ValidationError;

    fn try_from(request: CreatePaste) -> Result<Self, Self::Error> {
        let content = match request.content {
            Some(Value::String(content)) if !content.trim().is_empty() => content,
            _ => return Err(ValidationError::Content),
        };

        let ttl_ms = request
            .ttl_seconds
            .as_ref()
            .map(|ttl| {
                positive_integer(ttl)
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(|secs| secs.checked_mul(1000))
                    .ok_or(ValidationError::TtlSeconds)
            })
            .transpose()?;

        let max_views = request
            .max_views
            .as_ref()
            .map(|views| {
                positive_integer(views)
                    .and_then(|views| u32::try_from(views).ok())
                    .ok_or(ValidationError::MaxViews)
            })
            .transpose()?;

        Ok(Self {
            content,
            ttl_ms,
            max_views,
        })
    }
}

/// Accepts JSON numbers that are integers >= 1, including integral floats
/// such as `5.0`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn positive_integer(value: &Value) -> Option<u64> {
    let number = match value {
        Value::Number(number) => number,
        _ => return None,
    };

    if let Some(n) = number.as_u64() {
        return (n >= 1).then_some(n);
    }

    let float = number.as_f64()?;
    (float.is_finite() && float.fract() == 0.0 && float >= 1.0 && float < u64::MAX as f64)
        .then_some(float as u64)
}
