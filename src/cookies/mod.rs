//! Tracking cookie state
//!
//! The five tracking cookies are the only state that survives between
//! requests. [`CookieState`] holds their raw values; [`codec`] knows each
//! family's grammar and [`outbound`] turns recomputed values back into
//! `Set-Cookie` headers.

pub mod codec;
pub mod outbound;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TrackerError, TrackerResult};

pub use codec::{
    CampaignCookie, CustomVarCookie, DomainCookie, SessionCookie, TrafficSource, VisitorCookie,
};
pub use outbound::{outbound_cookies, CookieLifetimes, OutboundCookie};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CookieName {
    Visitor,
    Session,
    Domain,
    CustomVar,
    Campaign,
}

impl CookieName {
    /// Hydration order; later families override fields read from earlier ones.
    pub const ALL: [CookieName; 5] = [
        CookieName::Visitor,
        CookieName::Session,
        CookieName::Domain,
        CookieName::CustomVar,
        CookieName::Campaign,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CookieName::Visitor => "__utma",
            CookieName::Session => "__utmb",
            CookieName::Domain => "__utmc",
            CookieName::CustomVar => "__utmv",
            CookieName::Campaign => "__utmz",
        }
    }
}

impl FromStr for CookieName {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CookieName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| {
                TrackerError::out_of_range(format!("cookie '{s}' is not a tracking cookie"))
            })
    }
}

impl fmt::Display for CookieName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw values of the five tracking cookies; absent cookies are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieState {
    visitor: Option<String>,
    session: Option<String>,
    domain: Option<String>,
    custom_var: Option<String>,
    campaign: Option<String>,
}

impl CookieState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build state from name/value pairs, ignoring unrelated cookies and
    /// empty values.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = Self::default();
        for (name, value) in pairs {
            let Ok(name) = name.parse::<CookieName>() else {
                continue;
            };
            let value = value.trim();
            if !value.is_empty() {
                *state.slot_mut(name) = Some(value.to_string());
            }
        }
        state
    }

    /// Build state from a raw `Cookie:` request header value.
    pub fn from_cookie_header(header: &str) -> Self {
        let mut state = Self::default();
        state.merge_cookie_header(header);
        state
    }

    /// Merge another `Cookie:` header into this state (browsers may split
    /// cookies across several headers).
    pub fn merge_cookie_header(&mut self, header: &str) {
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let Ok(name) = name.trim().parse::<CookieName>() else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            let value = percent_decode_str(value).decode_utf8_lossy();
            let value = value.trim();
            if !value.is_empty() {
                *self.slot_mut(name) = Some(value.to_string());
            }
        }
    }

    pub fn get(&self, name: CookieName) -> Option<&str> {
        match name {
            CookieName::Visitor => self.visitor.as_deref(),
            CookieName::Session => self.session.as_deref(),
            CookieName::Domain => self.domain.as_deref(),
            CookieName::CustomVar => self.custom_var.as_deref(),
            CookieName::Campaign => self.campaign.as_deref(),
        }
    }

    pub fn contains(&self, name: CookieName) -> bool {
        self.get(name).is_some()
    }

    /// Store a cookie value. Empty values are rejected: every tracking cookie
    /// carries at least a domain identifier.
    pub fn set(&mut self, name: CookieName, value: &str) -> TrackerResult<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TrackerError::Internal(format!(
                "cookie {name} cannot have an empty value"
            )));
        }
        *self.slot_mut(name) = Some(value.to_string());
        Ok(())
    }

    /// Store a cookie value by its wire name.
    pub fn set_named(&mut self, name: &str, value: &str) -> TrackerResult<()> {
        self.set(name.parse()?, value)
    }

    pub fn remove(&mut self, name: CookieName) -> Option<String> {
        self.slot_mut(name).take()
    }

    /// Present cookies in hydration order.
    pub fn iter(&self) -> impl Iterator<Item = (CookieName, &str)> {
        CookieName::ALL
            .into_iter()
            .filter_map(|name| self.get(name).map(|value| (name, value)))
    }

    /// Cookie string reported in the beacon: `name=value;` pairs joined by a
    /// space, without the custom variable cookie.
    pub fn cookie_string(&self) -> String {
        self.iter()
            .filter(|(name, _)| *name != CookieName::CustomVar)
            .map(|(name, value)| format!("{name}={value};"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn slot_mut(&mut self, name: CookieName) -> &mut Option<String> {
        match name {
            CookieName::Visitor => &mut self.visitor,
            CookieName::Session => &mut self.session,
            CookieName::Domain => &mut self.domain,
            CookieName::CustomVar => &mut self.custom_var,
            CookieName::Campaign => &mut self.campaign,
        }
    }
}
