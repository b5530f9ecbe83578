//! Viewer IP extraction from HTTP headers with trust validation
//!
//! The viewer IP is part of the view dedup key, so forwarded headers are
//! only honoured when the deployment says a proxy sits in front:
//! - `Cloudflare` trusts `CF-Connecting-IP`
//! - `Standard` trusts RFC 7239 `Forwarded`, then `X-Forwarded-For`
//! - `None` uses the socket peer address

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{TrustedProxyMode, ViewsConfig};

/// Extract the viewer IP address according to the trust configuration.
/// Falls back to `socket_addr` whenever the headers cannot be trusted.
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &ViewsConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            extract_standard_ip(headers, socket_addr, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &ViewsConfig,
) -> Option<IpAddr> {
    // With a CIDR allowlist the direct peer must itself be a trusted proxy
    if !config.trusted_proxies.is_empty() && !is_trusted_proxy(socket_addr, config) {
        return None;
    }

    let chain = forwarded_chain(headers).or_else(|| x_forwarded_for_chain(headers))?;
    select_from_chain(&chain, config)
}

/// `for=` addresses from an RFC 7239 `Forwarded` header, client first
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let ips: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let param = param.trim();
            let (key, value) = param.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("for") {
                return None;
            }
            parse_forwarded_node(value.trim())
        })
        .collect();

    if ips.is_empty() {
        None
    } else {
        Some(ips)
    }
}

/// Parse a `for=` node: `192.0.2.60`, `"192.0.2.60:8080"`, `"[2001:db8::1]:443"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return addr.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    let (addr, _port) = value.rsplit_once(':')?;
    addr.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        None
    } else {
        Some(ips)
    }
}

/// Walk the chain right to left and pick the first hop that is not ours
fn select_from_chain(ips: &[IpAddr], config: &ViewsConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return ips.get(ips.len() - num_trusted - 1).copied();
        }
        // Not enough hops in the chain, return the leftmost
        return ips.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return ips
            .iter()
            .rev()
            .find(|ip| !is_trusted_proxy(**ip, config))
            .or_else(|| ips.first())
            .copied();
    }

    ips.last().copied()
}

fn is_trusted_proxy(ip: IpAddr, config: &ViewsConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_config(mode: TrustedProxyMode) -> ViewsConfig {
        ViewsConfig {
            trusted_proxy_mode: mode,
            ..ViewsConfig::default()
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_extract_client_ip_none_mode_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let config = create_config(TrustedProxyMode::None);

        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config);
        assert_eq!(result, ip("192.168.1.1"));
    }

    #[test]
    fn test_extract_cloudflare_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let config = create_config(TrustedProxyMode::Cloudflare);

        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config);
        assert_eq!(result, ip("203.0.113.1"));
    }

    #[test]
    fn test_cloudflare_mode_without_header_uses_socket() {
        let config = create_config(TrustedProxyMode::Cloudflare);
        let result = extract_client_ip(&HeaderMap::new(), ip("192.168.1.1"), &config);
        assert_eq!(result, ip("192.168.1.1"));
    }

    #[test]
    fn test_extract_x_forwarded_for_basic() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let config = create_config(TrustedProxyMode::Standard);

        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config);
        // Rightmost IP in the absence of trust configuration
        assert_eq!(result, ip("198.51.100.1"));
    }

    #[test]
    fn test_x_forwarded_for_with_num_trusted_proxies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1, 10.0.0.2"),
        );
        let config = ViewsConfig {
            num_trusted_proxies: Some(1),
            ..create_config(TrustedProxyMode::Standard)
        };

        let result = extract_client_ip(&headers, ip("10.0.0.3"), &config);
        assert_eq!(result, ip("198.51.100.1"));
    }

    #[test]
    fn test_x_forwarded_for_with_trusted_cidrs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.1.0.7, 10.0.0.2"),
        );
        let config = ViewsConfig {
            trusted_proxies: vec!["10.0.0.0/8".parse().unwrap()],
            ..create_config(TrustedProxyMode::Standard)
        };

        let result = extract_client_ip(&headers, ip("10.0.0.1"), &config);
        assert_eq!(result, ip("203.0.113.1"));

        // Peer outside the allowlist cannot vouch for forwarded headers
        let result = extract_client_ip(&headers, ip("198.51.100.9"), &config);
        assert_eq!(result, ip("198.51.100.9"));
    }

    #[test]
    fn test_forwarded_header_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:443\";proto=https, for=192.0.2.60:8080"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let config = create_config(TrustedProxyMode::Standard);

        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config);
        assert_eq!(result, ip("192.0.2.60"));
    }

    #[test]
    fn test_garbage_headers_fall_back_to_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown, nope"));
        let config = create_config(TrustedProxyMode::Standard);

        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config);
        assert_eq!(result, ip("192.168.1.1"));
    }
}
