//! Visitor address validation and anonymization

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::error::{TrackerError, TrackerResult};

fn dotted_quad() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^((\d{1,3}\.){3})\d{1,3}$").expect("dotted quad pattern is valid")
    })
}

/// Parse a visitor address; only IPv4 dotted quads are accepted. Octets may
/// carry leading zeros (`010.0.0.1`) but must fit in a byte.
pub fn parse_remote_address(remote_address: &str) -> TrackerResult<Ipv4Addr> {
    let invalid = || {
        TrackerError::invalid(format!(
            "remote address '{remote_address}' is not a valid IPv4 address"
        ))
    };
    let trimmed = remote_address.trim();
    if !dotted_quad().is_match(trimmed) {
        return Err(invalid());
    }
    let mut octets = [0u8; 4];
    for (octet, group) in octets.iter_mut().zip(trimmed.split('.')) {
        *octet = group.parse().map_err(|_| invalid())?;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Address reported in the beacon: the first three groups with the last
/// replaced by `0`. Anything that does not look like a dotted quad reports
/// as empty.
///
/// The check is textual, so `124.455.3.123` reports as `124.455.3.0`.
pub fn ip_to_report(remote_address: &str) -> String {
    dotted_quad()
        .captures(remote_address)
        .and_then(|caps| caps.get(1))
        .map(|prefix| format!("{}0", prefix.as_str()))
        .unwrap_or_default()
}
