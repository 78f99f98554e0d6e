use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use super::handlers::{collect_event, collect_page_view, health_check, RelayState};
use super::middleware::record_timing;

pub fn create_relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/collect/pageview", get(collect_page_view))
        .route("/collect/event", get(collect_event))
        .layer(middleware::from_fn(record_timing))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(Arc::new(state))
}
