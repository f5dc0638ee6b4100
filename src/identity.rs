//! Origin address resolution for voters behind proxies

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::types::OriginAddress;

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const REAL_IP: &str = "x-real-ip";

/// Origin used when neither headers nor the transport say anything
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// What the transport knows about a connection at upgrade time
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub headers: HeaderMap,
    pub peer: Option<SocketAddr>,
}

impl ConnectionContext {
    pub fn new(headers: HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self { headers, peer }
    }
}

/// Pick the most specific address available: first `X-Forwarded-For` hop,
/// then `X-Real-IP`, then the socket peer.
pub fn resolve(ctx: &ConnectionContext) -> OriginAddress {
    if let Some(first_hop) = header_str(&ctx.headers, FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first_hop.to_string();
    }

    if let Some(real_ip) = header_str(&ctx.headers, REAL_IP)
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    match ctx.peer {
        // Dual-stack listeners report IPv4 clients as ::ffff:a.b.c.d
        Some(addr) => addr.ip().to_canonical().to_string(),
        None => UNKNOWN_ORIGIN.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
