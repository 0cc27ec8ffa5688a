use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{error, warn};
use vex_metrics::CONTENT_TYPE;

use crate::router::AppState;

pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Response {
    // a client hanging up must not cancel the cycle, it updates shared state
    let coordinator = Arc::clone(&state.coordinator);
    let collection = match tokio::spawn(async move { coordinator.collect().await }).await {
        Ok(collection) => collection,
        Err(err) => {
            error!(error = %err, "collection task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !collection.is_success() && state.exit_on_errors {
        warn!("failed scrape with --exit-on-errors set, shutting down");
        state.fatal.send_replace(true);
    }

    let payload = match collection.encode() {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, kind = err.kind(), "failed to encode metrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));

    response
}
