//! Per-request attributes consumed by the rule engine and selector.

use std::net::{IpAddr, SocketAddr};

/// The classification input for one client request.
///
/// Built by the local listener from the parsed request line and connection
/// state; `is_https` is true when the client issued a `CONNECT` or the
/// listener already upgraded the stream.
#[derive(Debug, Clone)]
pub struct RequestFingerprint {
    pub method: String,
    pub host: String,
    pub port: u16,
    /// The request-URI as received (absolute form for plain proxying).
    pub uri: String,
    pub is_https: bool,
    pub peer: Option<SocketAddr>,
}

impl RequestFingerprint {
    /// `host:port` join, as used for hosts-layer lookups and dial targets.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The protocol this request is classified under: `https` for `CONNECT`
    /// or already-upgraded streams, `http` otherwise.
    pub fn protocol(&self) -> &'static str {
        if self.is_https || self.method.eq_ignore_ascii_case("CONNECT") {
            "https"
        } else {
            "http"
        }
    }
}

/// Split a `host[:port]` string, applying `default_port` when absent.
///
/// IPv6 literals in brackets keep their brackets stripped in the host part.
pub fn split_host_port(hostport: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = hostport.strip_prefix('[') {
        // [v6]:port or [v6]
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match hostport.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon and no brackets.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(p) => (host.to_string(), p),
            Err(_) => (hostport.to_string(), default_port),
        },
        _ => (hostport.to_string(), default_port),
    }
}

/// True when `host` is a non-routable address the selector must never send
/// through a remote transport: RFC1918 ranges, loopback, link-local, or the
/// `localhost` name.
pub fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => {
            let seg0 = v6.segments()[0];
            v6.is_loopback() || (seg0 & 0xfe00) == 0xfc00 || (seg0 & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}
