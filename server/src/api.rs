use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use fleeting_common::{
    CreatePaste, CreatedPaste, ErrorBody, Health, PasteView, API_ENDPOINT, SHARE_ENDPOINT,
};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

use crate::paste::{next_remaining_views, Paste, ValidationError};
use crate::store::{PasteStore, StoreError};
use crate::time::Now;

#[derive(Clone)]
pub struct AppState {
    pub store: PasteStore,
    /// Lets clients pin the clock with `x-test-now-ms`.
    pub test_mode: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_ENDPOINT}/pastes"), post(create))
        .route(&format!("{API_ENDPOINT}/pastes/:id"), get(fetch))
        .route(&format!("{API_ENDPOINT}/healthz"), get(healthz))
        .route(&format!("{SHARE_ENDPOINT}/:id"), get(share))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[instrument(skip_all)]
async fn create(
    State(state): State<AppState>,
    Now(now): Now,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedPaste>), StoreError> {
    let request = parse_create(&body)?;
    let paste = state.store.create(request, now).await?;

    let url = share_url(&headers, &paste.id);
    Ok((StatusCode::CREATED, Json(CreatedPaste { id: paste.id, url })))
}

#[instrument(skip(state))]
async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Now(now): Now,
) -> Result<Json<PasteView>, StoreError> {
    let paste = state.store.read_and_expire(&id, now).await?;
    Ok(Json(PasteView::from(paste)))
}

/// Share links hand out the bare content, spending a view like the API read.
#[instrument(skip(state))]
async fn share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Now(now): Now,
) -> Result<String, StoreError> {
    let paste = state.store.read_and_expire(&id, now).await?;
    Ok(paste.content)
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(Health { ok: true })),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Health { ok: false }))
        }
    }
}

/// Parses a creation request from a body holding a JSON object. The content
/// type is not checked, so bare `curl -d` uploads work.
fn parse_create(body: &[u8]) -> Result<CreatePaste, ValidationError> {
    let invalid = |e: serde_json::Error| ValidationError::Body(e.to_string());
    let object: Map<String, Value> = serde_json::from_slice(body).map_err(invalid)?;
    serde_json::from_value(Value::Object(object)).map_err(invalid)
}

/// Builds the share link from the headers the client reached us with.
fn share_url(headers: &HeaderMap, id: &str) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let proto = header("x-forwarded-proto").unwrap_or("http");
    let host = header("host").unwrap_or("localhost");
    format!("{proto}://{host}{SHARE_ENDPOINT}/{id}")
}

impl From<Paste> for PasteView {
    /// Reports the budget left after the read that produced `paste`.
    fn from(paste: Paste) -> Self {
        Self {
            remaining_views: next_remaining_views(paste.remaining_views),
            expires_at: paste
                .expires_at
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            content: paste.content,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                "Paste not found or expired".to_string(),
            ),
            Self::Internal(e) => {
                error!("Paste store failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}
