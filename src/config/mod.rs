use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cookies::CookieLifetimes;
use crate::error::{TrackerError, TrackerResult};
use crate::models::AccountId;
use crate::tracker::ip::parse_remote_address;
use crate::tracker::version::{parse_version, DEFAULT_VERSION};
use crate::tracker::{BEACON_URL, SCRIPT_URL};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tracker: TrackerConfig,
    pub relay: RelayConfig,
    pub bots: BotConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings applied to every tracker built by this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub account: Option<String>,
    pub version: String,
    /// Fetch the vendor script once at startup and adopt its version.
    pub sync_version: bool,
    pub charset: Option<String>,
    pub page_title: Option<String>,
    pub server_name: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub remote_address: Option<String>,
    pub session_cookie_timeout_ms: u64,
    pub visitor_cookie_timeout_ms: u64,
    pub beacon_url: String,
    pub script_url: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            account: None,
            version: DEFAULT_VERSION.to_string(),
            sync_version: false,
            charset: None,
            page_title: None,
            server_name: None,
            user_agent: None,
            accept_language: None,
            remote_address: None,
            session_cookie_timeout_ms: Self::DEFAULT_SESSION_TIMEOUT_MS,
            visitor_cookie_timeout_ms: Self::DEFAULT_VISITOR_TIMEOUT_MS,
            beacon_url: BEACON_URL.to_string(),
            script_url: SCRIPT_URL.to_string(),
        }
    }
}

impl TrackerConfig {
    pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1_800_000;
    pub const DEFAULT_VISITOR_TIMEOUT_MS: u64 = 63_072_000_000;

    /// Option names accepted by [`TrackerConfig::set_option`].
    pub const OPTIONS: [&'static str; 13] = [
        "account",
        "version",
        "sync_version",
        "charset",
        "page_title",
        "server_name",
        "user_agent",
        "accept_language",
        "remote_address",
        "session_cookie_timeout",
        "visitor_cookie_timeout",
        "beacon_url",
        "script_url",
    ];

    /// Apply one named option. Values are validated as they are set;
    /// unknown names are a range error.
    pub fn set_option(&mut self, name: &str, value: &str) -> TrackerResult<()> {
        match name {
            "account" => self.account = Some(value.parse::<AccountId>()?.into()),
            "version" => self.version = parse_version(value)?,
            "sync_version" => self.sync_version = parse_flag(value),
            "charset" => self.charset = Some(value.to_string()),
            "page_title" => self.page_title = Some(value.to_string()),
            "server_name" => self.server_name = Some(value.to_string()),
            "user_agent" => self.user_agent = Some(value.to_string()),
            "accept_language" => self.accept_language = Some(value.to_string()),
            "remote_address" => {
                parse_remote_address(value)?;
                self.remote_address = Some(value.to_string());
            }
            "session_cookie_timeout" => self.session_cookie_timeout_ms = parse_millis(name, value)?,
            "visitor_cookie_timeout" => self.visitor_cookie_timeout_ms = parse_millis(name, value)?,
            "beacon_url" => self.beacon_url = parse_endpoint(name, value)?,
            "script_url" => self.script_url = parse_endpoint(name, value)?,
            other => {
                return Err(TrackerError::out_of_range(format!(
                    "{other} is not an available option"
                )))
            }
        }
        Ok(())
    }

    /// Check the values that [`TrackerConfig::set_option`] would have
    /// rejected, for configs built some other way.
    pub fn validate(&self) -> TrackerResult<()> {
        if let Some(account) = &self.account {
            account.parse::<AccountId>()?;
        }
        parse_version(&self.version)?;
        if let Some(remote_address) = &self.remote_address {
            parse_remote_address(remote_address)?;
        }
        parse_endpoint("beacon_url", &self.beacon_url)?;
        parse_endpoint("script_url", &self.script_url)?;
        Ok(())
    }

    pub fn cookie_lifetimes(&self) -> CookieLifetimes {
        CookieLifetimes::from_millis(self.session_cookie_timeout_ms, self.visitor_cookie_timeout_ms)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_millis(name: &str, value: &str) -> TrackerResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        TrackerError::invalid(format!("{name} must be a number of milliseconds, got '{value}'"))
    })
}

fn parse_endpoint(name: &str, value: &str) -> TrackerResult<String> {
    url::Url::parse(value)
        .map(|_| value.to_string())
        .map_err(|e| TrackerError::invalid(format!("{name} '{value}' is not a valid URL: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only.
    #[default]
    None,
    /// Trust `Forwarded` / `X-Forwarded-For`.
    Standard,
    /// Trust `CF-Connecting-IP`.
    Cloudflare,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Number of proxies in front of the relay that append to
    /// `X-Forwarded-For`.
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    pub enabled: bool,
    pub list_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("RELAY_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("RELAY_PORT must be a port number")?;

        let mut tracker = TrackerConfig::default();
        for option in TrackerConfig::OPTIONS {
            let var = format!("TRACKER_{}", option.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                tracker
                    .set_option(option, &value)
                    .with_context(|| format!("invalid {var}"))?;
            }
        }

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };
        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a number")?;

        let bots_enabled = std::env::var("BOTS_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let bot_list_path = std::env::var("BOT_LIST_PATH").ok();
        if bots_enabled && bot_list_path.is_none() {
            tracing::warn!("BOTS_ENABLED is set without BOT_LIST_PATH, bot detection stays off");
        }

        let transport_enabled = std::env::var("TRANSPORT_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);
        let timeout_secs = std::env::var("TRANSPORT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Ok(Config {
            server: ServerConfig { host, port },
            tracker,
            relay: RelayConfig {
                trusted_proxy_mode,
                num_trusted_proxies,
            },
            bots: BotConfig {
                enabled: bots_enabled && bot_list_path.is_some(),
                list_path: bot_list_path,
            },
            transport: TransportConfig {
                enabled: transport_enabled,
                timeout_secs,
            },
        })
    }
}
