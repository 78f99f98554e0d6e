use axum::{
    extract::{ConnectInfo, Query, State},
    http::{
        header::{self, HeaderMap},
        HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use super::ip::extract_client_ip;
use crate::bot::BotDetector;
use crate::config::{RelayConfig, TrackerConfig};
use crate::cookies::CookieState;
use crate::error::TrackerError;
use crate::models::{Event, TrackingContext};
use crate::session::{Clock, IdSource};
use crate::tracker::{TrackOutcome, Tracker};
use crate::transport::Transport;

pub const OUTCOME_HEADER: HeaderName = HeaderName::from_static("x-utm-relay-outcome");

pub struct RelayState {
    pub tracker: TrackerConfig,
    pub relay: RelayConfig,
    pub bot_detector: Option<Arc<dyn BotDetector>>,
    pub transport: Option<Arc<dyn Transport>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdSource>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: TrackerError) -> HandlerError {
    let status = match &err {
        TrackerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        TrackerError::OutOfRange(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrackerError::Internal(_) => {
            warn!(error = %err, "tracking failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct PageViewQuery {
    pub path: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub category: Option<String>,
    pub action: Option<String>,
    pub label: Option<String>,
    pub value: Option<i64>,
    pub ni: Option<String>,
}

impl EventQuery {
    fn into_event(self) -> Event {
        Event {
            category: self.category,
            action: self.action,
            label: self.label,
            value: self.value,
            non_interaction: self
                .ni
                .is_some_and(|ni| matches!(ni.to_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }
}

/// Record a page view for the visitor making this request
pub async fn collect_page_view(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PageViewQuery>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let mut tracker = build_tracker(&state, &headers, addr.ip()).map_err(error_response)?;
    if let Some(title) = query.title {
        tracker.context_mut().set_page_title(title);
    }
    let outcome = tracker
        .track_page_view(query.path.as_deref())
        .await
        .map_err(error_response)?;
    Ok(outcome_response(&outcome))
}

/// Record an event for the visitor making this request
pub async fn collect_event(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<EventQuery>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let mut tracker = build_tracker(&state, &headers, addr.ip()).map_err(error_response)?;
    let outcome = tracker
        .track_event(&query.into_event())
        .await
        .map_err(error_response)?;
    Ok(outcome_response(&outcome))
}

/// Build a tracker from the visitor's request headers and address.
fn build_tracker(
    state: &RelayState,
    headers: &HeaderMap,
    socket_ip: IpAddr,
) -> Result<Tracker, TrackerError> {
    let header_value = move |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let host = header_value(header::HOST)
        .map(server_name)
        .unwrap_or_default();
    let mut context = TrackingContext::new(host);
    if let Some(user_agent) = header_value(header::USER_AGENT) {
        context.set_user_agent(user_agent);
    }
    if let Some(language) = header_value(header::ACCEPT_LANGUAGE) {
        context.set_accept_language(language);
    }
    if let Some(referer) = header_value(header::REFERER) {
        if let Err(err) = context.set_document_referer(referer) {
            debug!(error = %err, "ignoring unusable referer header");
        }
    }
    match extract_client_ip(headers, socket_ip, &state.relay) {
        IpAddr::V4(ip) => context.set_remote_address(&ip.to_string())?,
        IpAddr::V6(ip) => debug!(client_ip = %ip, "IPv6 client address is not reported"),
    }

    let mut cookies = CookieState::new();
    for value in headers.get_all(header::COOKIE) {
        if let Ok(value) = value.to_str() {
            cookies.merge_cookie_header(value);
        }
    }

    let mut tracker = Tracker::from_config(&state.tracker, context, cookies)?
        .with_clock(Arc::clone(&state.clock))
        .with_ids(Arc::clone(&state.ids));
    if let Some(detector) = &state.bot_detector {
        tracker = tracker.with_bot_detector(Arc::clone(detector));
    }
    if let Some(transport) = &state.transport {
        tracker = tracker.with_transport(Arc::clone(transport));
    }
    Ok(tracker)
}

/// Host header without its port. Bracketed IPv6 literals lose the brackets.
fn server_name(host: &str) -> &str {
    match host.strip_prefix('[') {
        Some(literal) => literal.split(']').next().unwrap_or(literal),
        None => host.split(':').next().unwrap_or(host),
    }
}

fn outcome_response(outcome: &TrackOutcome) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(OUTCOME_HEADER, HeaderValue::from_static(outcome.label()));
    if let Some(hit) = outcome.hit() {
        for cookie in &hit.outbound_cookies {
            match HeaderValue::from_str(&cookie.header_value()) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(err) => warn!(cookie = %cookie.name, error = %err, "skipping unencodable cookie"),
            }
        }
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_strips_port() {
        assert_eq!(server_name("example.com"), "example.com");
        assert_eq!(server_name("example.com:8080"), "example.com");
        assert_eq!(server_name("[::1]:3000"), "::1");
        assert_eq!(server_name("[2001:db8::7]"), "2001:db8::7");
    }
}
