//! Parse/render pairs for the tracking cookie families.
//!
//! Every family is a fixed-arity, dot-delimited record whose first field is
//! the domain identifier. Parsing never fails: a missing or non-numeric field
//! decodes as `None`, which the session machine treats as "derive a default".
//! Rendering requires every field to be present.

use crate::error::{TrackerError, TrackerResult};
use crate::models::CustomVarSegment;

/// Separator between the domain identifier and the custom variable segments.
const CUSTOM_VAR_MARKER: &str = ".|";

fn numeric<T: std::str::FromStr>(field: Option<&str>) -> Option<T> {
    field.and_then(|f| f.parse().ok())
}

fn required<T: ToString>(cookie: &str, field: &str, value: Option<&T>) -> TrackerResult<String> {
    value.map(ToString::to_string).ok_or_else(|| {
        TrackerError::Internal(format!("{cookie} cookie is missing its {field} field"))
    })
}

/// Long-lived visitor cookie:
/// `domainId.visitorId.firstVisit.lastVisit.currentVisit.sessionCount`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorCookie {
    pub domain_id: Option<u64>,
    pub visitor_id: Option<u64>,
    pub first_visit: Option<i64>,
    pub last_visit: Option<i64>,
    pub current_visit: Option<i64>,
    pub session_count: Option<u64>,
}

impl VisitorCookie {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(6, '.');
        Self {
            domain_id: numeric(parts.next()),
            visitor_id: numeric(parts.next()),
            first_visit: numeric(parts.next()),
            last_visit: numeric(parts.next()),
            current_visit: numeric(parts.next()),
            session_count: numeric(parts.next()),
        }
    }

    pub fn render(&self) -> TrackerResult<String> {
        const NAME: &str = "visitor";
        Ok([
            required(NAME, "domain id", self.domain_id.as_ref())?,
            required(NAME, "visitor id", self.visitor_id.as_ref())?,
            required(NAME, "first visit", self.first_visit.as_ref())?,
            required(NAME, "last visit", self.last_visit.as_ref())?,
            required(NAME, "current visit", self.current_visit.as_ref())?,
            required(NAME, "session count", self.session_count.as_ref())?,
        ]
        .join("."))
    }
}

/// Short session cookie: `domainId.pageVisits.sessionCount.currentVisit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookie {
    pub domain_id: Option<u64>,
    pub page_visits: Option<u64>,
    pub session_count: Option<u64>,
    pub current_visit: Option<i64>,
}

impl SessionCookie {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(4, '.');
        Self {
            domain_id: numeric(parts.next()),
            page_visits: numeric(parts.next()),
            session_count: numeric(parts.next()),
            current_visit: numeric(parts.next()),
        }
    }

    pub fn render(&self) -> TrackerResult<String> {
        const NAME: &str = "session";
        Ok([
            required(NAME, "domain id", self.domain_id.as_ref())?,
            required(NAME, "page visits", self.page_visits.as_ref())?,
            required(NAME, "session count", self.session_count.as_ref())?,
            required(NAME, "current visit", self.current_visit.as_ref())?,
        ]
        .join("."))
    }
}

/// Browser-session cookie holding only the domain identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainCookie {
    pub domain_id: Option<u64>,
}

impl DomainCookie {
    pub fn parse(raw: &str) -> Self {
        Self {
            domain_id: numeric(Some(raw)),
        }
    }

    pub fn render(&self) -> TrackerResult<String> {
        required("domain", "domain id", self.domain_id.as_ref())
    }
}

/// Visitor-scoped custom variables: `domainId.|seg^seg^...` where each
/// segment is `index=name=value=scope`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomVarCookie {
    pub domain_id: Option<u64>,
    pub segments: Vec<CustomVarSegment>,
}

impl CustomVarCookie {
    /// Returns `None` when the value lacks the `.|` marker.
    pub fn parse(raw: &str) -> Option<Self> {
        let (domain_id, rest) = raw.split_once(CUSTOM_VAR_MARKER)?;
        let segments = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('^').map(parse_segment).collect()
        };
        Some(Self {
            domain_id: numeric(Some(domain_id)),
            segments,
        })
    }

    pub fn render(&self) -> TrackerResult<String> {
        let domain_id = required("custom variable", "domain id", self.domain_id.as_ref())?;
        let segments: Vec<String> = self.segments.iter().map(CustomVarSegment::render).collect();
        Ok(format!("{domain_id}{CUSTOM_VAR_MARKER}{}", segments.join("^")))
    }
}

fn parse_segment(raw: &str) -> CustomVarSegment {
    let mut parts = raw.splitn(4, '=');
    CustomVarSegment {
        index: numeric(parts.next()),
        name: parts.next().unwrap_or_default().to_string(),
        value: parts.next().unwrap_or_default().to_string(),
        scope: numeric(parts.next()),
    }
}

/// Where the visitor came from, kept verbatim as `key=value|key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSource(String);

impl TrafficSource {
    pub fn direct() -> Self {
        Self("utmcsr=(direct)|utmccn=(direct)|utmcmd=(none)".to_string())
    }

    pub fn referral(host: &str, path: &str) -> Self {
        Self(format!(
            "utmcsr={host}|utmccn=(referral)|utmcmd=referral|utmcct={path}"
        ))
    }

    pub fn parse(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// True when the string names a source (`utmcsr=`), i.e. it is usable as is.
    pub fn has_source(&self) -> bool {
        self.0.contains("utmcsr=")
    }

    /// Value of a token such as `utmcsr` or `utmcct`.
    pub fn token(&self, key: &str) -> Option<&str> {
        self.0
            .split('|')
            .filter_map(|token| token.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Campaign cookie:
/// `domainId.firstVisit.sessionCount.sessionVisitCount.trafficSource`.
///
/// The traffic source is the fifth field and may itself contain dots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignCookie {
    pub domain_id: Option<u64>,
    pub first_visit: Option<i64>,
    pub session_count: Option<u64>,
    pub session_visit_count: Option<u64>,
    pub traffic_source: Option<TrafficSource>,
}

impl CampaignCookie {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(5, '.');
        Self {
            domain_id: numeric(parts.next()),
            first_visit: numeric(parts.next()),
            session_count: numeric(parts.next()),
            session_visit_count: numeric(parts.next()),
            traffic_source: parts.next().map(TrafficSource::parse),
        }
    }

    pub fn render(&self) -> TrackerResult<String> {
        const NAME: &str = "campaign";
        let traffic_source = self
            .traffic_source
            .as_ref()
            .map(|source| source.as_str().to_string());
        Ok([
            required(NAME, "domain id", self.domain_id.as_ref())?,
            required(NAME, "first visit", self.first_visit.as_ref())?,
            required(NAME, "session count", self.session_count.as_ref())?,
            required(NAME, "session visit count", self.session_visit_count.as_ref())?,
            required(NAME, "traffic source", traffic_source.as_ref())?,
        ]
        .join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visitor_cookie_fields() {
        let cookie = VisitorCookie::parse("5.42.1000.1100.1200.3");
        assert_eq!(cookie.domain_id, Some(5));
        assert_eq!(cookie.visitor_id, Some(42));
        assert_eq!(cookie.first_visit, Some(1000));
        assert_eq!(cookie.last_visit, Some(1100));
        assert_eq!(cookie.current_visit, Some(1200));
        assert_eq!(cookie.session_count, Some(3));
        assert_eq!(cookie.render().unwrap(), "5.42.1000.1100.1200.3");
    }

    #[test]
    fn test_visitor_cookie_extra_fields_stay_in_last_part() {
        // The sixth part swallows the remainder, making it non-numeric
        let cookie = VisitorCookie::parse("5.42.1000.1100.1200.3.9");
        assert_eq!(cookie.session_count, None);
        assert_eq!(cookie.current_visit, Some(1200));
    }

    #[test]
    fn test_malformed_fields_decode_as_absent() {
        let cookie = VisitorCookie::parse("abc.42..x");
        assert_eq!(cookie.domain_id, None);
        assert_eq!(cookie.visitor_id, Some(42));
        assert_eq!(cookie.first_visit, None);
        assert_eq!(cookie.last_visit, None);
        assert_eq!(cookie.current_visit, None);
        assert_eq!(cookie.session_count, None);
        assert!(matches!(cookie.render(), Err(TrackerError::Internal(_))));
    }

    #[test]
    fn test_session_cookie_fields() {
        let cookie = SessionCookie::parse("5.7.3.1200");
        assert_eq!(cookie.page_visits, Some(7));
        assert_eq!(cookie.session_count, Some(3));
        assert_eq!(cookie.current_visit, Some(1200));
        assert_eq!(cookie.render().unwrap(), "5.7.3.1200");
    }

    #[test]
    fn test_domain_cookie() {
        assert_eq!(DomainCookie::parse("60493049").domain_id, Some(60_493_049));
        assert_eq!(DomainCookie::parse("nope").domain_id, None);
    }

    #[test]
    fn test_custom_var_cookie_segments() {
        let cookie = CustomVarCookie::parse("5.|1=member=gold=1^3=region=eu=1").unwrap();
        assert_eq!(cookie.domain_id, Some(5));
        assert_eq!(cookie.segments.len(), 2);
        assert_eq!(cookie.segments[1].index, Some(3));
        assert_eq!(cookie.segments[1].name, "region");
        assert_eq!(cookie.segments[1].value, "eu");
        assert_eq!(cookie.segments[1].scope, Some(1));
        assert_eq!(cookie.render().unwrap(), "5.|1=member=gold=1^3=region=eu=1");
    }

    #[test]
    fn test_custom_var_cookie_requires_marker() {
        assert!(CustomVarCookie::parse("5.1=member=gold=1").is_none());
        let empty = CustomVarCookie::parse("5.|").unwrap();
        assert!(empty.segments.is_empty());
    }

    #[test]
    fn test_custom_var_segment_value_keeps_extra_separators() {
        let cookie = CustomVarCookie::parse("5.|2=k=v=1=extra").unwrap();
        assert_eq!(cookie.segments[0].value, "v");
        assert_eq!(cookie.segments[0].scope, None);
    }

    #[test]
    fn test_campaign_cookie_keeps_dotted_traffic_source() {
        let raw = "5.1000.3.1.utmcsr=www.search.example|utmccn=(referral)|utmcmd=referral|utmcct=/q";
        let cookie = CampaignCookie::parse(raw);
        assert_eq!(cookie.session_visit_count, Some(1));
        let source = cookie.traffic_source.clone().unwrap();
        assert!(source.has_source());
        assert_eq!(source.token("utmcsr"), Some("www.search.example"));
        assert_eq!(source.token("utmcct"), Some("/q"));
        assert_eq!(source.token("utmctr"), None);
        assert_eq!(cookie.render().unwrap(), raw);
    }

    #[test]
    fn test_traffic_source_constructors() {
        assert_eq!(
            TrafficSource::direct().as_str(),
            "utmcsr=(direct)|utmccn=(direct)|utmcmd=(none)"
        );
        assert_eq!(
            TrafficSource::referral("news.example.org", "/story").as_str(),
            "utmcsr=news.example.org|utmccn=(referral)|utmcmd=referral|utmcct=/story"
        );
        assert!(!TrafficSource::parse("garbage").has_source());
    }
}
