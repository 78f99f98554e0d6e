//! Bot detection
//!
//! The tracker asks a [`BotDetector`] before every hit and suppresses the
//! beacon when the visitor is a known crawler. [`BotList`] is the bundled
//! detector, fed from the public user-agent CSV export.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait BotDetector: Send + Sync {
    async fn is_bot(&self, user_agent: &str, remote_address: &str) -> bool;
}

/// Known bots keyed by name (value: user agent) plus known bot addresses
/// (value: bot name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotList {
    bots: BTreeMap<String, String>,
    ips: BTreeMap<String, String>,
}

impl BotList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the CSV export. Column 1 is the bot name, column 2 its address
    /// and the user agent is column 7 when present, otherwise column 3. The
    /// first row for a name or address wins.
    pub fn parse_csv(contents: &str) -> Self {
        let mut list = Self::default();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let columns = split_csv_line(line);
            let Some(name) = columns.first() else {
                continue;
            };
            if let Some(user_agent) = columns.get(6).or_else(|| columns.get(2)) {
                list.bots
                    .entry(name.clone())
                    .or_insert_with(|| user_agent.clone());
            }
            if let Some(ip) = columns.get(1) {
                list.ips.entry(ip.clone()).or_insert_with(|| name.clone());
            }
        }
        list
    }

    /// Render in the three-column cache format: `"name","ip","user agent"`.
    pub fn to_csv(&self) -> String {
        let by_name: BTreeMap<&str, &str> = self
            .ips
            .iter()
            .map(|(ip, name)| (name.as_str(), ip.as_str()))
            .collect();
        let mut out = String::new();
        for (name, user_agent) in &self.bots {
            let ip = by_name.get(name.as_str()).copied().unwrap_or_default();
            out.push_str(&format!(
                "\"{}\",\"{}\",\"{}\"\n",
                escape(name),
                escape(ip),
                escape(user_agent)
            ));
        }
        out
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read bot list {}", path.display()))?;
        let list = Self::parse_csv(&contents);
        debug!(path = %path.display(), bots = list.len(), "loaded bot list");
        Ok(list)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_csv())
            .await
            .with_context(|| format!("failed to write bot list {}", path.display()))
    }

    pub fn matches(&self, user_agent: &str, remote_address: &str) -> bool {
        let agent_known = !user_agent.is_empty()
            && (self.bots.contains_key(user_agent)
                || self.bots.values().any(|ua| ua == user_agent));
        let address_known = !remote_address.is_empty() && self.ips.contains_key(remote_address);
        agent_known || address_known
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty() && self.ips.is_empty()
    }
}

#[async_trait]
impl BotDetector for BotList {
    async fn is_bot(&self, user_agent: &str, remote_address: &str) -> bool {
        self.matches(user_agent, remote_address)
    }
}

fn escape(field: &str) -> String {
    field.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split one CSV line on commas outside double quotes. Inside quotes both
/// `""` and `\"` stand for a literal quote.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    field.push(next);
                }
            }
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            '\r' if !in_quotes => {}
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}
