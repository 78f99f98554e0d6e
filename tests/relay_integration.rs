//! Relay integration tests
//!
//! Drive the HTTP relay with in-process requests and check the status codes,
//! outcome header and `Set-Cookie` headers it returns.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower::{Layer, ServiceExt};

use utm_relay::bot::{BotDetector, BotList};
use utm_relay::config::{RelayConfig, TrackerConfig, TrustedProxyMode};
use utm_relay::relay::{create_relay_router, RelayState, OUTCOME_HEADER};
use utm_relay::session::{FixedClock, FixedIds};
use utm_relay::transport::{BeaconRequest, Transport, TransportResult};

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([198, 51, 100, 23], 40000));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<BeaconRequest>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn get(&self, request: &BeaconRequest) -> TransportResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(String::new())
    }
}

fn tracker_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.set_option("account", "UA-12345-1").unwrap();
    config
}

fn app(transport: Arc<RecordingTransport>, relay: RelayConfig, bots: Option<BotList>) -> Router {
    create_relay_router(RelayState {
        tracker: tracker_config(),
        relay,
        bot_detector: bots.map(|list| Arc::new(list) as Arc<dyn BotDetector>),
        transport: Some(transport as Arc<dyn Transport>),
        clock: Arc::new(FixedClock(1_700_000_000)),
        ids: Arc::new(FixedIds {
            visitor_id: 42,
            nonce: 7,
        }),
    })
    .layer(TestConnectInfoLayer)
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let app = app(Arc::default(), RelayConfig::default(), None);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_page_view_sets_tracking_cookies() {
    let transport = Arc::new(RecordingTransport::default());
    let app = app(transport.clone(), RelayConfig::default(), None);

    let request = Request::builder()
        .uri("/collect/pageview?path=%2Fpricing&title=Pricing")
        .header(header::HOST, "example.com:8080")
        .header(header::USER_AGENT, "Mozilla/5.0")
        .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
        .header(header::COOKIE, "theme=dark; __utma=5.9.100.100.100.2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[&OUTCOME_HEADER], "sent");

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 4);
    assert!(cookies[0].starts_with("__utma=5.9.100.100.1700000000.3; Expires="));
    assert!(cookies[0].ends_with("; Path=/; Domain=.example.com"));
    assert_eq!(cookies[2], "__utmc=5; Path=/; Domain=.example.com");

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let beacon = url::Url::parse(&requests[0].url).unwrap();
    let params: Vec<(String, String)> = beacon.query_pairs().into_owned().collect();
    assert!(params.contains(&("utmhn".to_string(), "example.com".to_string())));
    assert!(params.contains(&("utmp".to_string(), "/pricing".to_string())));
    assert!(params.contains(&("utmdt".to_string(), "Pricing".to_string())));
    assert!(params.contains(&("utmul".to_string(), "en-us".to_string())));
    assert!(params.contains(&("utmip".to_string(), "198.51.100.0".to_string())));
    assert_eq!(requests[0].remote_address.as_deref(), Some("198.51.100.23"));
}

#[tokio::test]
async fn test_event_uses_forwarded_address_behind_proxy() {
    let transport = Arc::new(RecordingTransport::default());
    let relay = RelayConfig {
        trusted_proxy_mode: TrustedProxyMode::Standard,
        num_trusted_proxies: Some(1),
    };
    let app = app(transport.clone(), relay, None);

    let request = Request::builder()
        .uri("/collect/event?category=Video&action=Play&value=12&ni=1")
        .header(header::HOST, "example.com")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let requests = transport.requests.lock().unwrap();
    let beacon = url::Url::parse(&requests[0].url).unwrap();
    let params: Vec<(String, String)> = beacon.query_pairs().into_owned().collect();
    assert!(params.contains(&("utme".to_string(), "5(Video*Play)(12)".to_string())));
    assert!(params.contains(&("utmni".to_string(), "1".to_string())));
    assert!(params.contains(&("utmip".to_string(), "203.0.113.0".to_string())));
}

#[tokio::test]
async fn test_incomplete_event_is_bad_request() {
    let transport = Arc::new(RecordingTransport::default());
    let app = app(transport.clone(), RelayConfig::default(), None);

    let request = Request::builder()
        .uri("/collect/event?category=Video")
        .header(header::HOST, "example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
    assert!(transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bot_gets_no_cookies() {
    let transport = Arc::new(RecordingTransport::default());
    let bots = BotList::parse_csv("\"Googlebot\",\"66.249.66.1\",\"Googlebot/2.1\"\n");
    let app = app(transport.clone(), RelayConfig::default(), Some(bots));

    let request = Request::builder()
        .uri("/collect/pageview?path=/")
        .header(header::HOST, "example.com")
        .header(header::USER_AGENT, "Googlebot/2.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[&OUTCOME_HEADER], "suppressed");
    assert!(set_cookies(&response).is_empty());
    assert!(transport.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_referer_is_ignored() {
    let transport = Arc::new(RecordingTransport::default());
    let app = app(transport.clone(), RelayConfig::default(), None);

    let request = Request::builder()
        .uri("/collect/pageview")
        .header(header::HOST, "example.com")
        .header(header::REFERER, "not a url")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let requests = transport.requests.lock().unwrap();
    let beacon = url::Url::parse(&requests[0].url).unwrap();
    let params: Vec<(String, String)> = beacon.query_pairs().into_owned().collect();
    assert!(params.contains(&("utmr".to_string(), "-".to_string())));
}

#[tokio::test]
async fn test_ipv6_literal_host() {
    let transport = Arc::new(RecordingTransport::default());
    let app = app(transport.clone(), RelayConfig::default(), None);

    let request = Request::builder()
        .uri("/collect/pageview?path=/")
        .header(header::HOST, "[::1]:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let requests = transport.requests.lock().unwrap();
    let beacon = url::Url::parse(&requests[0].url).unwrap();
    let params: Vec<(String, String)> = beacon.query_pairs().into_owned().collect();
    assert!(params.contains(&("utmhn".to_string(), "::1".to_string())));
}
