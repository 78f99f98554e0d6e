use chrono::DateTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use super::{CookieName, CookieState};

pub const COOKIE_PATH: &str = "/";

/// Campaign cookies live for three months.
pub const CAMPAIGN_LIFETIME_SECS: i64 = 60 * 60 * 24 * 90;

/// Bytes that cannot appear in a cookie value. The format's own delimiters
/// (`|`, `=`, `(`, `)`) stay readable so the vendor script can parse them.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b'%');

/// Expiry settings for the session and visitor cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieLifetimes {
    pub session_secs: i64,
    pub visitor_secs: i64,
}

impl Default for CookieLifetimes {
    fn default() -> Self {
        Self {
            session_secs: 1800,
            visitor_secs: 63_072_000,
        }
    }
}

impl CookieLifetimes {
    /// Lifetimes from millisecond timeouts, rounded to whole seconds.
    pub fn from_millis(session_ms: u64, visitor_ms: u64) -> Self {
        Self {
            session_secs: millis_to_secs(session_ms),
            visitor_secs: millis_to_secs(visitor_ms),
        }
    }

    /// Absolute expiry for a cookie written at `now`; `None` means a
    /// browser-session cookie.
    pub fn expiry(&self, name: CookieName, now: i64) -> Option<i64> {
        match name {
            CookieName::Session => Some(now + self.session_secs),
            CookieName::Domain => None,
            CookieName::Campaign => Some(now + CAMPAIGN_LIFETIME_SECS),
            CookieName::Visitor | CookieName::CustomVar => Some(now + self.visitor_secs),
        }
    }
}

fn millis_to_secs(ms: u64) -> i64 {
    i64::try_from(ms.saturating_add(500) / 1000).unwrap_or(i64::MAX)
}

/// A cookie the host should send back to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundCookie {
    pub name: CookieName,
    pub value: String,
    pub expires: Option<i64>,
    pub domain: Option<String>,
    pub path: &'static str,
}

impl OutboundCookie {
    /// Render as a `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut header = format!(
            "{}={}",
            self.name,
            utf8_percent_encode(&self.value, COOKIE_VALUE)
        );
        if let Some(expires) = self.expires.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        header.push_str("; Path=");
        header.push_str(self.path);
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        header
    }
}

/// Cookies to emit after a state update, scoped to `.<server_name>`.
pub fn outbound_cookies(
    state: &CookieState,
    server_name: &str,
    now: i64,
    lifetimes: &CookieLifetimes,
) -> Vec<OutboundCookie> {
    let domain = (!server_name.is_empty()).then(|| format!(".{server_name}"));
    state
        .iter()
        .map(|(name, value)| OutboundCookie {
            name,
            value: value.to_string(),
            expires: lifetimes.expiry(name, now),
            domain: domain.clone(),
            path: COOKIE_PATH,
        })
        .collect()
}
