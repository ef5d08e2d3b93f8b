use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error envelope returned by every non-2xx API response.
#[derive(Debug, Serialize)]
pub struct Message {
    #[serde(rename = "Message")]
    pub message: String,
}

impl Message {
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(Message {
                message: message.into(),
            }),
        )
            .into_response()
    }
}
