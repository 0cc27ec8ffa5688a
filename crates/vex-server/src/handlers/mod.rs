pub mod health;
pub mod metrics;

use axum::http::StatusCode;

/// Anything but the configured paths. No hint where metrics live.
pub async fn bad_request() -> StatusCode {
    StatusCode::BAD_REQUEST
}
