use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use fleeting_common::TestNow;
use headers::HeaderMapExt;

use crate::api::AppState;
use crate::paste::Millis;

pub fn now_ms() -> Millis {
    Utc::now().timestamp_millis()
}

/// The instant a request is evaluated at. Sampled once per request so every
/// check made on its behalf agrees on the time.
///
/// In test mode an `x-test-now-ms` header takes the place of the wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Now(pub Millis);

#[async_trait]
impl FromRequestParts<AppState> for Now {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.test_mode {
            if let Some(TestNow(now)) = parts.headers.typed_get::<TestNow>() {
                return Ok(Self(now));
            }
        }

        Ok(Self(now_ms()))
    }
}
