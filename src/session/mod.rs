//! Visit and session continuity
//!
//! Recomputes all tracking cookies from their previous values and the
//! current request. Wall-clock time and random identifiers come from the
//! injected [`Clock`] and [`IdSource`] so the computation can be pinned in
//! tests.

use url::Url;

use crate::cookies::{
    CampaignCookie, CookieName, CookieState, CustomVarCookie, DomainCookie, SessionCookie,
    TrafficSource, VisitorCookie,
};
use crate::error::TrackerResult;
use crate::hash::domain_hash;
use crate::models::TrackingContext;

/// Upper bound (inclusive) of a freshly minted visitor id.
pub const MAX_VISITOR_ID: u64 = 999_999_999;

/// Upper bound (inclusive) of the beacon cache-busting nonce.
pub const MAX_NONCE: u32 = 0x7fff_ffff;

pub trait Clock: Send + Sync {
    /// Current time as Unix seconds.
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

pub trait IdSource: Send + Sync {
    /// A visitor id in `0..=MAX_VISITOR_ID`.
    fn visitor_id(&self) -> u64;

    /// A nonce in `0..=MAX_NONCE`.
    fn nonce(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn visitor_id(&self) -> u64 {
        rand::random_range(0..=MAX_VISITOR_ID)
    }

    fn nonce(&self) -> u32 {
        rand::random_range(0..=MAX_NONCE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedIds {
    pub visitor_id: u64,
    pub nonce: u32,
}

impl IdSource for FixedIds {
    fn visitor_id(&self) -> u64 {
        self.visitor_id
    }

    fn nonce(&self) -> u32 {
        self.nonce
    }
}

/// Fields recovered from the inbound cookies.
///
/// Families are read in [`CookieName::ALL`] order and each present family
/// overwrites the fields it carries, even with an absent value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorState {
    pub domain_id: Option<u64>,
    pub visitor_id: Option<u64>,
    pub first_visit: Option<i64>,
    pub current_visit: Option<i64>,
    pub session_count: Option<u64>,
    pub page_visits: Option<u64>,
    pub traffic_source: Option<TrafficSource>,
    pub had_session_cookie: bool,
    pub had_campaign_cookie: bool,
}

impl PriorState {
    pub fn from_cookies(cookies: &CookieState) -> Self {
        let mut prior = Self::default();

        if let Some(raw) = cookies.get(CookieName::Visitor) {
            let visitor = VisitorCookie::parse(raw);
            prior.domain_id = visitor.domain_id;
            prior.visitor_id = visitor.visitor_id;
            prior.first_visit = visitor.first_visit;
            prior.current_visit = visitor.current_visit;
            prior.session_count = visitor.session_count;
        }
        if let Some(raw) = cookies.get(CookieName::Session) {
            let session = SessionCookie::parse(raw);
            prior.domain_id = session.domain_id;
            prior.page_visits = session.page_visits;
            prior.session_count = session.session_count;
            prior.current_visit = session.current_visit;
            prior.had_session_cookie = true;
        }
        if let Some(raw) = cookies.get(CookieName::Domain) {
            prior.domain_id = DomainCookie::parse(raw).domain_id;
        }
        if let Some(custom) = cookies.get(CookieName::CustomVar).and_then(CustomVarCookie::parse) {
            prior.domain_id = custom.domain_id;
        }
        if let Some(raw) = cookies.get(CookieName::Campaign) {
            let campaign = CampaignCookie::parse(raw);
            prior.domain_id = campaign.domain_id;
            prior.first_visit = campaign.first_visit;
            prior.session_count = campaign.session_count;
            prior.traffic_source = campaign.traffic_source;
            prior.had_campaign_cookie = true;
        }

        prior
    }
}

/// Computes the next cookie state for one tracked hit.
pub struct SessionMachine<'a> {
    clock: &'a dyn Clock,
    ids: &'a dyn IdSource,
}

impl<'a> SessionMachine<'a> {
    pub fn new(clock: &'a dyn Clock, ids: &'a dyn IdSource) -> Self {
        Self { clock, ids }
    }

    /// Recompute every tracking cookie.
    ///
    /// `visitor_custom_vars` are the `index=name=value=scope` segments of the
    /// visitor-scoped custom variables; the custom variable cookie is only
    /// written when there is at least one.
    pub fn advance(
        &self,
        previous: &CookieState,
        ctx: &TrackingContext,
        visitor_custom_vars: &[String],
    ) -> TrackerResult<CookieState> {
        let prior = PriorState::from_cookies(previous);
        let now = self.clock.now();

        let domain_id = prior
            .domain_id
            .unwrap_or_else(|| u64::from(domain_hash(ctx.server_name())));
        let visitor_id = prior.visitor_id.unwrap_or_else(|| self.ids.visitor_id());
        let first_visit = prior.first_visit.unwrap_or(now);

        // A returning hit within the same browser session carries both the
        // session and campaign cookies; anything else starts a new session.
        let session_count = match prior.session_count {
            None => 1,
            Some(count) if prior.had_session_cookie && prior.had_campaign_cookie => count,
            Some(count) => count.saturating_add(1),
        };
        let session_visit_count = 1;
        let page_visits = prior.page_visits.map_or(1, |visits| visits.saturating_add(1));
        let last_visit = prior.current_visit.unwrap_or(now);
        let current_visit = now;

        let traffic_source = referral_source(ctx.document_referer(), ctx.server_name())
            .or(prior.traffic_source)
            .filter(TrafficSource::has_source)
            .unwrap_or_else(TrafficSource::direct);

        let mut next = CookieState::new();
        next.set(
            CookieName::Visitor,
            &VisitorCookie {
                domain_id: Some(domain_id),
                visitor_id: Some(visitor_id),
                first_visit: Some(first_visit),
                last_visit: Some(last_visit),
                current_visit: Some(current_visit),
                session_count: Some(session_count),
            }
            .render()?,
        )?;
        next.set(
            CookieName::Session,
            &SessionCookie {
                domain_id: Some(domain_id),
                page_visits: Some(page_visits),
                session_count: Some(session_count),
                current_visit: Some(current_visit),
            }
            .render()?,
        )?;
        next.set(
            CookieName::Domain,
            &DomainCookie {
                domain_id: Some(domain_id),
            }
            .render()?,
        )?;
        next.set(
            CookieName::Campaign,
            &CampaignCookie {
                domain_id: Some(domain_id),
                first_visit: Some(first_visit),
                session_count: Some(session_count),
                session_visit_count: Some(session_visit_count),
                traffic_source: Some(traffic_source),
            }
            .render()?,
        )?;
        if !visitor_custom_vars.is_empty() {
            next.set(
                CookieName::CustomVar,
                &format!("{domain_id}.|{}", visitor_custom_vars.join("^")),
            )?;
        }

        Ok(next)
    }
}

/// Referral source for a referer on another host; `None` for same-site,
/// empty or unparseable referers.
fn referral_source(referer: &str, server_name: &str) -> Option<TrafficSource> {
    if referer.is_empty() || server_name.is_empty() {
        return None;
    }
    let url = Url::parse(referer).ok()?;
    let host = url.host_str()?;
    if host.eq_ignore_ascii_case(server_name) {
        return None;
    }
    Some(TrafficSource::referral(host, url.path()))
}
