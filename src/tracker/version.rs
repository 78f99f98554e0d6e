use regex::Regex;
use std::sync::OnceLock;

use crate::error::{TrackerError, TrackerResult};

/// Tracker version reported when none is configured.
pub const DEFAULT_VERSION: &str = "5.2.5";

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+\.){2}\d+$").expect("version pattern is valid"))
}

fn script_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"=function\(\)\{return['"]((\d+\.){2}\d+)['"]"#)
            .expect("script version pattern is valid")
    })
}

pub fn is_valid_version(version: &str) -> bool {
    version_pattern().is_match(version)
}

/// Validate a `major.minor.patch` version string.
pub fn parse_version(version: &str) -> TrackerResult<String> {
    if is_valid_version(version) {
        Ok(version.to_string())
    } else {
        Err(TrackerError::invalid(format!(
            "version '{version}' must be in the form x.y.z"
        )))
    }
}

/// Find the tracker version embedded in the vendor's tracking script.
pub fn version_from_script(script: &str) -> Option<&str> {
    script_version_pattern()
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
