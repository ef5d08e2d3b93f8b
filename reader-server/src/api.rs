use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use reader_core::storage::Storage;

use crate::response::Message;

/// Timestamp format accepted by the `offset` query parameter. No zone
/// suffix; interpreted in the server's local zone.
pub const OFFSET_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub type SharedStorage = Arc<dyn Storage>;

pub fn router(storage: SharedStorage) -> Router {
    Router::new()
        .route("/feeds", get(feeds))
        .route("/latest", get(latest))
        .route("/latest/{uuid}", get(latest_from_feed))
        .route("/article/{uuid}", get(article))
        .layer(TraceLayer::new_for_http())
        .with_state(storage)
}

#[derive(Debug, Deserialize)]
struct OffsetQuery {
    offset: Option<String>,
}

/// Parses the pagination offset, falling back to "now" when the
/// parameter is missing or unparseable.
fn time_offset(query: &OffsetQuery) -> DateTime<Utc> {
    query
        .offset
        .as_deref()
        .and_then(|raw| NaiveDateTime::parse_from_str(raw, OFFSET_TIME_FORMAT).ok())
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

async fn feeds(State(storage): State<SharedStorage>) -> Response {
    match storage.feeds().await {
        Ok(feeds) => Json(feeds).into_response(),
        Err(_) => Message::with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not retrieve feeds",
        ),
    }
}

async fn latest(
    State(storage): State<SharedStorage>,
    Query(query): Query<OffsetQuery>,
) -> Response {
    match storage.latest(time_offset(&query)).await {
        Ok(articles) => Json(articles).into_response(),
        Err(_) => Message::with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not retrieve latest articles from feed",
        ),
    }
}

async fn latest_from_feed(
    State(storage): State<SharedStorage>,
    Path(raw): Path<String>,
    Query(query): Query<OffsetQuery>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&raw) else {
        return Message::with_status(StatusCode::BAD_REQUEST, "UUID not found");
    };

    match storage.latest_from_feed(id, time_offset(&query)).await {
        Ok(articles) => Json(articles).into_response(),
        Err(_) => Message::with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not retrieve latest articles from feed",
        ),
    }
}

async fn article(State(storage): State<SharedStorage>, Path(raw): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&raw) else {
        return Message::with_status(StatusCode::BAD_REQUEST, "UUID not found");
    };

    match storage.article(id).await {
        Ok(article) => Json(article).into_response(),
        Err(_) => Message::with_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "could not retrieve article",
        ),
    }
}
