use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use vex_exporter::ScrapeCoordinator;

use crate::handlers;

pub struct AppState {
    pub coordinator: Arc<ScrapeCoordinator>,
    pub exit_on_errors: bool,
    /// Set once a failed scrape should stop the server.
    pub fatal: watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ScrapeCoordinator>,
        exit_on_errors: bool,
        fatal: watch::Sender<bool>,
    ) -> Self {
        Self {
            coordinator,
            exit_on_errors,
            fatal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutePaths {
    pub metrics: String,
    pub health: Option<String>,
}

pub fn exporter_router(state: Arc<AppState>, paths: &RoutePaths) -> Router {
    let mut router = Router::new().route(
        &paths.metrics,
        get(handlers::metrics::prometheus_metrics),
    );
    if let Some(health) = &paths.health {
        router = router.route(health, get(handlers::health::health));
    }

    // metrics mounted at the root answer every other path as well
    router = if paths.metrics == "/" {
        router.fallback(handlers::metrics::prometheus_metrics)
    } else {
        router.fallback(handlers::bad_request)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
