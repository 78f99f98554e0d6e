use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use url::Url;

use crate::error::{TrackerError, TrackerResult};
use crate::tracker::ip::{ip_to_report, parse_remote_address};

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en";
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Request-scoped facts about the visitor and the page being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingContext {
    user_agent: String,
    remote_address: Option<Ipv4Addr>,
    accept_language: String,
    server_name: String,
    document_referer: String,
    document_path: String,
    page_title: String,
    charset: String,
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            remote_address: None,
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            server_name: String::new(),
            document_referer: String::new(),
            document_path: String::new(),
            page_title: String::new(),
            charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

impl TrackingContext {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.user_agent = user_agent.into();
    }

    pub fn remote_address(&self) -> Option<Ipv4Addr> {
        self.remote_address
    }

    /// Set the visitor address; must be an IPv4 dotted quad.
    pub fn set_remote_address(&mut self, remote_address: &str) -> TrackerResult<()> {
        self.remote_address = Some(parse_remote_address(remote_address)?);
        Ok(())
    }

    /// Remote address with the last octet zeroed, or empty when unknown.
    pub fn ip_to_report(&self) -> String {
        self.remote_address
            .map(|ip| ip_to_report(&ip.to_string()))
            .unwrap_or_default()
    }

    pub fn accept_language(&self) -> &str {
        &self.accept_language
    }

    /// Keep only the primary language tag of an `Accept-Language` value.
    pub fn set_accept_language(&mut self, accept_language: &str) {
        let primary = accept_language.split(';').next().unwrap_or_default();
        let primary = primary.split(',').next().unwrap_or_default();
        self.accept_language = primary.to_lowercase();
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn set_server_name(&mut self, server_name: impl Into<String>) {
        self.server_name = server_name.into();
    }

    pub fn document_referer(&self) -> &str {
        &self.document_referer
    }

    /// Set the referring URL. A non-empty referer must be an absolute URL.
    pub fn set_document_referer(&mut self, referer: &str) -> TrackerResult<()> {
        let referer = referer.trim();
        if !referer.is_empty() && Url::parse(referer).is_err() {
            return Err(TrackerError::invalid(format!(
                "document referer '{referer}' must be a valid URL"
            )));
        }
        self.document_referer = referer.to_string();
        Ok(())
    }

    pub fn document_path(&self) -> &str {
        &self.document_path
    }

    /// Set the requested path; any query string is dropped.
    pub fn set_document_path(&mut self, path: &str) {
        let path = match path.find('?') {
            Some(pos) => &path[..pos],
            None => path,
        };
        self.document_path = path.to_string();
    }

    pub fn page_title(&self) -> &str {
        &self.page_title
    }

    pub fn set_page_title(&mut self, title: impl Into<String>) {
        self.page_title = title.into();
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn set_charset(&mut self, charset: &str) {
        self.charset = charset.to_uppercase();
    }
}
