//! Client key extraction for the attempt limiter.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Key used when no header or peer address identifies the caller
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate limit key for a request.
///
/// Prefers the first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
/// socket address. The value is used verbatim.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first_ip) = forwarded.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return first_ip.to_string();
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
