use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

pub const TIMING_HEADER: HeaderName = HeaderName::from_static("x-utm-relay-timing-ms");

/// Report the time spent handling the request, tracking call included.
pub async fn record_timing(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&start.elapsed().as_millis().to_string()) {
        response.headers_mut().insert(TIMING_HEADER, value);
    }
    response
}
