//! HTTP API for checkout reservations and the notification queue.
//!
//! Checkout places and commits holds, the payment webhook turns an order's
//! holds into ledger decrements plus a confirmation email, and the admin
//! routes expose sweeping, queue pause/resume, stats and cleanup. Requests are
//! traced with `tower-http` and counters are scraped from `/metrics`.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use jobs::JobStore;
use metrics_exporter_prometheus::PrometheusHandle;
use reservations::ReservationStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: ReservationStore + 'static, J: JobStore + 'static>(
    state: Arc<AppState<R, J>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let admin = Router::new()
        .route(
            "/reservations",
            get(routes::admin::list_reservations::<R, J>),
        )
        .route(
            "/reservations/sweep",
            post(routes::admin::sweep::<R, J>),
        )
        .route(
            "/reservations/{id}/release",
            post(routes::admin::release_reservation::<R, J>),
        )
        .route("/queue/stats", get(routes::admin::queue_stats::<R, J>))
        .route("/queue/pause", post(routes::admin::pause::<R, J>))
        .route("/queue/resume", post(routes::admin::resume::<R, J>))
        .route("/queue/clean", post(routes::admin::clean::<R, J>))
        .route("/queue/jobs", get(routes::admin::list_jobs::<R, J>))
        .route("/queue/jobs/{id}", get(routes::admin::get_job::<R, J>));

    Router::new()
        .route("/health", get(routes::health::check::<R, J>))
        .route(
            "/stock/{subject}",
            get(routes::stock::get::<R, J>).put(routes::stock::set::<R, J>),
        )
        .route("/reservations", post(routes::reservations::create::<R, J>))
        .route(
            "/reservations/{id}/commit",
            post(routes::reservations::commit::<R, J>),
        )
        .route(
            "/reservations/{id}/cancel",
            post(routes::reservations::cancel::<R, J>),
        )
        .route(
            "/payments/confirmed",
            post(routes::payments::confirmed::<R, J>),
        )
        .nest("/admin", admin)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
