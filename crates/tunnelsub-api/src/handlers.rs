use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::AppState;

pub const GREETING: &str = "Hello World";

/// Liveness greeting
pub async fn greeting() -> &'static str {
    GREETING
}

/// Current subscription document
///
/// 404 until the first document is published, 500 when the file exists
/// but cannot be read.
pub async fn subscription(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    if path.trim_end_matches('/') != state.subscription_path {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }

    match state.store.read().await {
        Ok(Some(contents)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            contents,
        )
            .into_response(),
        Ok(None) => {
            debug!("Subscription requested before it was published");
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
        Err(e) => {
            error!("Failed to read subscription: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error reading subscription").into_response()
        }
    }
}
