//! Tracking orchestrator
//!
//! A [`Tracker`] is built per request from the visitor's context and inbound
//! cookies. Each `track_*` call validates its input, consults the bot gate,
//! advances the cookie state, assembles the beacon URL and hands it to the
//! transport. The updated cookies are returned to the caller whether or not
//! the beacon was delivered.

pub mod ip;
pub mod version;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::bot::BotDetector;
use crate::config::TrackerConfig;
use crate::cookies::{
    outbound_cookies, CookieLifetimes, CookieName, CookieState, CustomVarCookie, OutboundCookie,
};
use crate::encoder::{event_params, page_view_params, url_decode, with_custom_vars};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{AccountId, CustomVarSegment, CustomVariables, Event, Scope, TrackingContext};
use crate::session::{Clock, IdSource, RandomIds, SessionMachine, SystemClock};
use crate::transport::{BeaconRequest, Transport};

use self::version::{parse_version, version_from_script, DEFAULT_VERSION};

/// Collector endpoint receiving the beacon.
pub const BEACON_URL: &str = "http://www.google-analytics.com/__utm.gif";

/// Vendor tracking script, used to discover the current tracker version.
pub const SCRIPT_URL: &str = "http://www.google-analytics.com/ga.js";

/// The assembled beacon request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Beacon {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl Beacon {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum Delivery {
    Sent,
    /// No transport configured; the beacon was assembled only.
    Disabled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedHit {
    pub beacon: Beacon,
    pub cookies: CookieState,
    pub outbound_cookies: Vec<OutboundCookie>,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TrackOutcome {
    /// The bot gate flagged the visitor; nothing was computed or sent.
    Suppressed,
    Tracked(TrackedHit),
}

impl TrackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TrackOutcome::Suppressed => "suppressed",
            TrackOutcome::Tracked(hit) => match hit.delivery {
                Delivery::Sent => "sent",
                Delivery::Disabled => "disabled",
                Delivery::Failed(_) => "failed",
            },
        }
    }

    pub fn hit(&self) -> Option<&TrackedHit> {
        match self {
            TrackOutcome::Suppressed => None,
            TrackOutcome::Tracked(hit) => Some(hit),
        }
    }
}

pub struct Tracker {
    context: TrackingContext,
    account: Option<AccountId>,
    version: String,
    custom_vars: CustomVariables,
    restored_vars: Vec<CustomVarSegment>,
    cookies: CookieState,
    lifetimes: CookieLifetimes,
    beacon_url: String,
    script_url: String,
    bot_detector: Option<Arc<dyn BotDetector>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
}

impl Tracker {
    /// Tracker for one request. Visitor-scoped custom variables stored in the
    /// inbound cookies fill their slots when the hit is tracked, after any
    /// variable set explicitly.
    pub fn new(context: TrackingContext, inbound: CookieState) -> Self {
        let restored_vars = inbound
            .get(CookieName::CustomVar)
            .and_then(CustomVarCookie::parse)
            .map(|cookie| cookie.segments)
            .unwrap_or_default();

        Self {
            context,
            account: None,
            version: DEFAULT_VERSION.to_string(),
            custom_vars: CustomVariables::new(),
            restored_vars,
            cookies: inbound,
            lifetimes: CookieLifetimes::default(),
            beacon_url: BEACON_URL.to_string(),
            script_url: SCRIPT_URL.to_string(),
            bot_detector: None,
            transport: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
        }
    }

    /// Tracker with process-wide settings applied on top of the request
    /// context. Configured visitor overrides replace the request's values.
    pub fn from_config(
        config: &TrackerConfig,
        mut context: TrackingContext,
        inbound: CookieState,
    ) -> TrackerResult<Self> {
        if let Some(server_name) = &config.server_name {
            context.set_server_name(server_name.as_str());
        }
        if let Some(user_agent) = &config.user_agent {
            context.set_user_agent(user_agent.as_str());
        }
        if let Some(accept_language) = &config.accept_language {
            context.set_accept_language(accept_language);
        }
        if let Some(remote_address) = &config.remote_address {
            context.set_remote_address(remote_address)?;
        }
        if let Some(charset) = &config.charset {
            context.set_charset(charset);
        }
        if let Some(page_title) = &config.page_title {
            context.set_page_title(page_title.as_str());
        }

        let mut tracker = Self::new(context, inbound)
            .with_lifetimes(config.cookie_lifetimes())
            .with_endpoints(&config.beacon_url, &config.script_url);
        tracker.set_version(&config.version)?;
        if let Some(account) = &config.account {
            tracker.set_account(account)?;
        }
        Ok(tracker)
    }

    pub fn with_bot_detector(mut self, detector: Arc<dyn BotDetector>) -> Self {
        self.bot_detector = Some(detector);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_lifetimes(mut self, lifetimes: CookieLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    pub fn with_endpoints(mut self, beacon_url: &str, script_url: &str) -> Self {
        self.beacon_url = beacon_url.to_string();
        self.script_url = script_url.to_string();
        self
    }

    pub fn context(&self) -> &TrackingContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TrackingContext {
        &mut self.context
    }

    /// Current cookie state: the inbound cookies until a hit is tracked,
    /// the recomputed ones afterwards.
    pub fn cookies(&self) -> &CookieState {
        &self.cookies
    }

    pub fn account(&self) -> Option<&AccountId> {
        self.account.as_ref()
    }

    pub fn set_account(&mut self, account: &str) -> TrackerResult<()> {
        self.account = Some(account.parse()?);
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: &str) -> TrackerResult<()> {
        self.version = parse_version(version)?;
        Ok(())
    }

    pub fn set_remote_address(&mut self, remote_address: &str) -> TrackerResult<()> {
        self.context.set_remote_address(remote_address)
    }

    pub fn ip_to_report(&self) -> String {
        self.context.ip_to_report()
    }

    /// Set a custom variable, returning its slot index.
    pub fn set_custom_var(
        &mut self,
        name: &str,
        value: &str,
        scope: Scope,
        index: Option<u8>,
    ) -> TrackerResult<u8> {
        self.custom_vars.set(name, value, scope, index)
    }

    /// Remove an explicitly set variable. A variable restored from the
    /// inbound cookie at the same index comes back on the next hit.
    pub fn delete_custom_var(&mut self, index: u8) -> bool {
        self.custom_vars.delete(index)
    }

    /// Value of the custom variable at `index`, including variables restored
    /// from the inbound cookie.
    pub fn visitor_custom_var(&self, index: u8) -> TrackerResult<String> {
        self.custom_vars().value(index).map(str::to_string)
    }

    pub fn custom_vars_by_scope(&self, scope: Scope) -> Vec<String> {
        self.custom_vars().by_scope(scope)
    }

    /// The slots as the next hit will send them: explicit variables first,
    /// then those restored from the inbound cookie.
    pub fn custom_vars(&self) -> CustomVariables {
        let mut vars = self.custom_vars.clone();
        vars.hydrate(&self.restored_vars);
        vars
    }

    /// Adopt the version announced by the vendor script. Returns the new
    /// version, or `None` when it could not be fetched or found.
    pub async fn sync_version_from_script(&mut self) -> Option<String> {
        let transport = self.transport.as_ref()?;
        let body = match transport.get(&BeaconRequest::new(&self.script_url)).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %self.script_url, error = %e, "failed to fetch tracking script");
                return None;
            }
        };
        let Some(found) = version_from_script(&body) else {
            debug!(url = %self.script_url, "no version found in tracking script");
            return None;
        };
        self.version = found.to_string();
        Some(self.version.clone())
    }

    /// Track a page view. `url` is either a path (`/…`) or an absolute URL
    /// whose host replaces the server name.
    pub async fn track_page_view(&mut self, url: Option<&str>) -> TrackerResult<TrackOutcome> {
        match url {
            Some(path) if path.is_empty() || path.starts_with('/') => {
                self.context.set_document_path(path);
            }
            Some(absolute) => {
                let parsed = Url::parse(absolute).map_err(|e| {
                    TrackerError::invalid(format!("url '{absolute}' is invalid: {e}"))
                })?;
                if let Some(host) = parsed.host_str() {
                    self.context.set_server_name(host);
                }
                self.context.set_document_path(parsed.path());
            }
            None => {}
        }
        let params = page_view_params(&self.context);
        self.track(params).await
    }

    pub async fn track_event(&mut self, event: &Event) -> TrackerResult<TrackOutcome> {
        let params = event_params(event)?;
        self.track(params).await
    }

    async fn track(&mut self, extra: Vec<(&'static str, String)>) -> TrackerResult<TrackOutcome> {
        let account = self
            .account
            .clone()
            .ok_or_else(|| TrackerError::invalid("an account id must be set before tracking"))?;
        let mut url = Url::parse(&self.beacon_url).map_err(|e| {
            TrackerError::Internal(format!("beacon url '{}' is invalid: {e}", self.beacon_url))
        })?;

        let remote_address = self
            .context
            .remote_address()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        if let Some(detector) = &self.bot_detector {
            if detector
                .is_bot(self.context.user_agent(), &remote_address)
                .await
            {
                info!(
                    user_agent = %self.context.user_agent(),
                    remote_address = %remote_address,
                    "beacon suppressed for bot"
                );
                return Ok(TrackOutcome::Suppressed);
            }
        }

        let restored = std::mem::take(&mut self.restored_vars);
        self.custom_vars.hydrate(&restored);

        let now = self.clock.now();
        let visitor_vars = self.custom_vars.by_scope(Scope::Visitor);
        self.cookies = SessionMachine::new(self.clock.as_ref(), self.ids.as_ref()).advance(
            &self.cookies,
            &self.context,
            &visitor_vars,
        )?;

        let referer = match self.context.document_referer() {
            "" => "-".to_string(),
            referer => url_decode(referer),
        };
        let mut params: Vec<(&'static str, String)> = vec![
            ("utmwv", self.version.clone()),
            ("utmn", self.ids.nonce().to_string()),
            ("utmhn", self.context.server_name().to_string()),
            ("utmr", referer),
            ("utmac", account.to_string()),
            ("utmcc", self.cookies.cookie_string()),
            ("utmul", self.context.accept_language().to_string()),
            ("utmcs", self.context.charset().to_string()),
            ("utmip", self.context.ip_to_report()),
            ("utmu", "q~".to_string()),
        ];
        params.extend(with_custom_vars(extra, &self.custom_vars));

        url.query_pairs_mut().extend_pairs(params.iter());
        let beacon = Beacon {
            url: url.to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };

        let delivery = self.dispatch(&beacon, &remote_address).await;
        let outbound = outbound_cookies(
            &self.cookies,
            self.context.server_name(),
            now,
            &self.lifetimes,
        );

        Ok(TrackOutcome::Tracked(TrackedHit {
            beacon,
            cookies: self.cookies.clone(),
            outbound_cookies: outbound,
            delivery,
        }))
    }

    async fn dispatch(&self, beacon: &Beacon, remote_address: &str) -> Delivery {
        let Some(transport) = &self.transport else {
            debug!(url = %beacon.url, "transport disabled, beacon not sent");
            return Delivery::Disabled;
        };

        let request = BeaconRequest {
            url: beacon.url.clone(),
            user_agent: Some(self.context.user_agent().to_string()),
            accept_language: Some(self.context.accept_language().to_string()),
            remote_address: Some(remote_address.to_string()),
        };
        debug!(url = %beacon.url, "dispatching beacon");
        match transport.get(&request).await {
            Ok(_) => Delivery::Sent,
            Err(e) => {
                warn!(
                    account = ?self.account.as_ref().map(AccountId::as_str),
                    error = %e,
                    "beacon delivery failed"
                );
                Delivery::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FixedClock, FixedIds};
    use crate::transport::{TransportError, TransportResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<BeaconRequest>>,
        body: String,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn get(&self, request: &BeaconRequest) -> TransportResult<String> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                Err(TransportError::Status(503))
            } else {
                Ok(self.body.clone())
            }
        }
    }

    struct AlwaysBot;

    #[async_trait]
    impl BotDetector for AlwaysBot {
        async fn is_bot(&self, _user_agent: &str, _remote_address: &str) -> bool {
            true
        }
    }

    fn tracker(inbound: CookieState) -> Tracker {
        let mut ctx = TrackingContext::new("example.com");
        ctx.set_user_agent("Mozilla/5.0");
        ctx.set_remote_address("192.168.1.100").unwrap();
        ctx.set_accept_language("en-GB,en;q=0.8");
        let mut tracker = Tracker::new(ctx, inbound)
            .with_clock(Arc::new(FixedClock(NOW)))
            .with_ids(Arc::new(FixedIds {
                visitor_id: 123_456_789,
                nonce: 42,
            }));
        tracker.set_account("UA-12345-1").unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_page_view_beacon_parameters() {
        let mut tracker = tracker(CookieState::new());
        tracker.context_mut().set_page_title("Home");
        let outcome = tracker.track_page_view(Some("/index.html?x=1")).await.unwrap();

        assert_eq!(outcome.label(), "disabled");
        let hit = outcome.hit().unwrap();
        let keys: Vec<&str> = hit.beacon.params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "utmwv", "utmn", "utmhn", "utmr", "utmac", "utmcc", "utmul", "utmcs", "utmip",
                "utmu", "utmp", "utmdt"
            ]
        );
        assert_eq!(hit.beacon.param("utmwv"), Some("5.2.5"));
        assert_eq!(hit.beacon.param("utmn"), Some("42"));
        assert_eq!(hit.beacon.param("utmr"), Some("-"));
        assert_eq!(hit.beacon.param("utmul"), Some("en-gb"));
        assert_eq!(hit.beacon.param("utmip"), Some("192.168.1.0"));
        assert_eq!(hit.beacon.param("utmp"), Some("/index.html"));
        assert!(hit
            .beacon
            .url
            .starts_with("http://www.google-analytics.com/__utm.gif?utmwv=5.2.5&utmn=42&"));
        assert_eq!(hit.outbound_cookies.len(), 4);
    }

    #[tokio::test]
    async fn test_account_required() {
        let mut tracker = Tracker::new(TrackingContext::new("example.com"), CookieState::new());
        assert!(matches!(
            tracker.track_page_view(None).await,
            Err(TrackerError::InvalidArgument(_))
        ));
        assert!(tracker.cookies().iter().next().is_none());
    }

    #[tokio::test]
    async fn test_invalid_event_leaves_state_untouched() {
        let inbound = CookieState::from_pairs([("__utma", "5.42.1000.1000.1000.3")]);
        let mut tracker = tracker(inbound.clone());
        let event = Event {
            category: Some("Cat".into()),
            ..Default::default()
        };
        assert!(tracker.track_event(&event).await.is_err());
        assert_eq!(tracker.cookies(), &inbound);

        let transport = Arc::new(RecordingTransport::default());
        let mut tracker = tracker.with_transport(transport.clone());
        let event = Event {
            category: None,
            action: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            tracker.track_event(&event).await,
            Err(TrackerError::InvalidArgument(_))
        ));
        assert_eq!(tracker.cookies(), &inbound);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bot_is_suppressed_without_transport_call() {
        let transport = Arc::new(RecordingTransport::default());
        let mut tracker = tracker(CookieState::new())
            .with_bot_detector(Arc::new(AlwaysBot))
            .with_transport(transport.clone());

        let outcome = tracker.track_page_view(Some("/")).await.unwrap();
        assert_eq!(outcome, TrackOutcome::Suppressed);
        assert!(transport.requests.lock().unwrap().is_empty());
        assert!(tracker.cookies().iter().next().is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_new_cookies() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let mut tracker = tracker(CookieState::new()).with_transport(transport.clone());

        let outcome = tracker.track_event(&Event::new("Cat", "Act")).await.unwrap();
        assert_eq!(outcome.label(), "failed");
        assert!(tracker.cookies().contains(CookieName::Visitor));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(requests[0].remote_address.as_deref(), Some("192.168.1.100"));
    }

    #[tokio::test]
    async fn test_event_with_custom_vars() {
        let transport = Arc::new(RecordingTransport::default());
        let mut tracker = tracker(CookieState::new()).with_transport(transport);
        tracker
            .set_custom_var("member", "gold", Scope::Visitor, None)
            .unwrap();

        let outcome = tracker
            .track_event(&Event::new("Cat", "Act").with_value(3).non_interactive())
            .await
            .unwrap();
        assert_eq!(outcome.label(), "sent");
        let hit = outcome.hit().unwrap();
        assert_eq!(hit.beacon.param("utmt"), Some("event"));
        assert_eq!(
            hit.beacon.param("utme"),
            Some("5(Cat*Act)(3)8(member)9(gold)11(1)")
        );
        assert_eq!(hit.beacon.param("utmni"), Some("1"));
        assert_eq!(
            hit.cookies.get(CookieName::CustomVar),
            Some("60493049.|1=member=gold=1")
        );
    }

    #[tokio::test]
    async fn test_custom_vars_restored_from_cookie() {
        let inbound = CookieState::from_pairs([("__utmv", "5.|2=member=gold=1")]);
        let mut tracker = tracker(inbound);
        assert_eq!(tracker.visitor_custom_var(2).unwrap(), "gold");

        tracker
            .set_custom_var("member", "platinum", Scope::Visitor, Some(2))
            .unwrap();
        assert_eq!(
            tracker.custom_vars_by_scope(Scope::Visitor),
            vec!["2=member=platinum=1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_restored_custom_vars_follow_explicit_ones() {
        let inbound = CookieState::from_pairs([("__utmv", "5.|3=plan=pro=1")]);
        let mut tracker = tracker(inbound);
        tracker
            .set_custom_var("member", "gold", Scope::Visitor, Some(1))
            .unwrap();

        let outcome = tracker.track_page_view(Some("/")).await.unwrap();
        let hit = outcome.hit().unwrap();
        assert_eq!(
            hit.beacon.param("utme"),
            Some("8(member*plan)9(gold*pro)11(1*3!1)")
        );
        assert_eq!(
            hit.cookies.get(CookieName::CustomVar),
            Some("5.|1=member=gold=1^3=plan=pro=1")
        );
    }

    #[tokio::test]
    async fn test_deleting_explicit_var_restores_cookie_value() {
        let inbound = CookieState::from_pairs([("__utmv", "5.|2=member=gold=1")]);
        let mut tracker = tracker(inbound);
        tracker
            .set_custom_var("member", "platinum", Scope::Visitor, Some(2))
            .unwrap();
        assert!(tracker.delete_custom_var(2));
        assert_eq!(tracker.visitor_custom_var(2).unwrap(), "gold");
    }

    #[tokio::test]
    async fn test_absolute_url_sets_server_name() {
        let mut tracker = tracker(CookieState::new());
        let outcome = tracker
            .track_page_view(Some("https://shop.example.org/cart?step=2"))
            .await
            .unwrap();
        let hit = outcome.hit().unwrap();
        assert_eq!(hit.beacon.param("utmhn"), Some("shop.example.org"));
        assert_eq!(hit.beacon.param("utmp"), Some("/cart"));
        assert_eq!(
            hit.outbound_cookies[0].domain.as_deref(),
            Some(".shop.example.org")
        );

        assert!(matches!(
            tracker.track_page_view(Some("not a url")).await,
            Err(TrackerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_version_from_script() {
        let transport = Arc::new(RecordingTransport {
            body: "var x=function(){return'5.3.1'};".to_string(),
            ..Default::default()
        });
        let mut tracker = tracker(CookieState::new()).with_transport(transport.clone());
        assert_eq!(tracker.sync_version_from_script().await.as_deref(), Some("5.3.1"));
        assert_eq!(tracker.version(), "5.3.1");
        assert_eq!(transport.requests.lock().unwrap()[0].url, SCRIPT_URL);
    }

    #[test]
    fn test_from_config_applies_overrides() {
        let mut config = TrackerConfig::default();
        config.set_option("account", "UA-9999-2").unwrap();
        config.set_option("charset", "iso-8859-1").unwrap();
        config.set_option("server_name", "override.example").unwrap();

        let tracker = Tracker::from_config(
            &config,
            TrackingContext::new("example.com"),
            CookieState::new(),
        )
        .unwrap();
        assert_eq!(tracker.account().map(AccountId::as_str), Some("UA-9999-2"));
        assert_eq!(tracker.context().charset(), "ISO-8859-1");
        assert_eq!(tracker.context().server_name(), "override.example");
    }
}
