//! Client address resolution behind optional reverse proxies

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{RelayConfig, TrustedProxyMode};

/// Resolve the visitor's address from the socket and, when the relay sits
/// behind trusted proxies, the forwarding headers.
pub fn extract_client_ip(headers: &HeaderMap, socket_ip: IpAddr, config: &RelayConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_ip
        }),
        TrustedProxyMode::Standard => extract_from_forwarded(headers)
            .or_else(|| extract_from_x_forwarded_for(headers, config.num_trusted_proxies))
            .unwrap_or(socket_ip),
        TrustedProxyMode::None => socket_ip,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// First `for=` address of an RFC 7239 `Forwarded` header.
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| param.trim().strip_prefix("for="))
        .find_map(|value| {
            let value = value.trim_matches('"');
            // [v6]:port, v4:port or a bare address
            let host = match value.strip_prefix('[') {
                Some(rest) => rest.split(']').next().unwrap_or(rest),
                None if value.matches(':').count() == 1 => {
                    value.split(':').next().unwrap_or(value)
                }
                None => value,
            };
            host.parse::<IpAddr>().ok()
        })
}

/// Address in `X-Forwarded-For`, skipping the entries appended by trusted
/// proxies from the right.
fn extract_from_x_forwarded_for(
    headers: &HeaderMap,
    num_trusted_proxies: Option<usize>,
) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    match num_trusted_proxies {
        Some(trusted) if ips.len() > trusted => Some(ips[ips.len() - trusted - 1]),
        // Chain shorter than the proxy count: the leftmost entry is all we have
        Some(_) => ips.first().copied(),
        None => ips.last().copied(),
    }
}
