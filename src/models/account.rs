use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::TrackerError;

static ACCOUNT_PATTERN: OnceLock<Regex> = OnceLock::new();

fn account_pattern() -> &'static Regex {
    ACCOUNT_PATTERN.get_or_init(|| {
        Regex::new(r"^(MO|UA)-\d{4,}-\d+$").expect("account id pattern is a valid regex")
    })
}

/// Web property the beacon is reported against, `UA-XXXX-Y` or `MO-XXXX-Y`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if account_pattern().is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(TrackerError::invalid(format!(
                "account id '{s}' must be in the format UA-XXXXXXX-X or MO-XXXXXXX-X"
            )))
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(account: AccountId) -> Self {
        account.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
