//! Relay endpoint convention and handshake metadata
//!
//! The gateway address is configured as a plain http(s) URL; the daemon
//! rewrites the scheme to ws(s) and appends the fixed `/gateway` path
//! before dialing. Routing metadata rides on the WebSocket handshake as
//! `x-tunnel-*` headers.

use url::Url;

use crate::identity::TunnelTarget;
use crate::ProtoError;

/// Header names carried on the outbound relay handshake.
pub mod headers {
    /// Tunnel kind marker; always [`TUNNEL_TYPE_LINK`] for port links
    pub const TUNNEL_TYPE: &str = "x-tunnel-type";
    pub const TUNNEL_TYPE_LINK: &str = "lnk";
    /// Opaque bearer token
    pub const TUNNEL_TOKEN: &str = "x-tunnel-token";
    /// Remote cluster / edge id
    pub const LINK_EDGE: &str = "x-tunnel-link-edge";
    /// Remote target host
    pub const LINK_HOST: &str = "x-tunnel-link-host";
    /// Remote target port
    pub const LINK_PORT: &str = "x-tunnel-link-port";
}

/// Full metadata header set for one tunnel's relay connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHeaders {
    pub token: String,
    pub target: TunnelTarget,
}

impl RelayHeaders {
    pub fn new(token: impl Into<String>, target: TunnelTarget) -> Self {
        Self {
            token: token.into(),
            target,
        }
    }

    /// Render as (name, value) pairs in handshake order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (headers::TUNNEL_TYPE, headers::TUNNEL_TYPE_LINK.to_string()),
            (headers::TUNNEL_TOKEN, self.token.clone()),
            (headers::LINK_EDGE, self.target.edge_id.clone()),
            (headers::LINK_HOST, self.target.host.clone()),
            (headers::LINK_PORT, self.target.port.to_string()),
        ]
    }
}

/// Rewrite a relay base URL to the WebSocket endpoint the daemon dials.
///
/// `http` becomes `ws`, `https` becomes `wss`, `ws`/`wss` pass through
/// unchanged; the fixed `/gateway` suffix is appended to the path.
pub fn relay_url(base: &str) -> Result<Url, ProtoError> {
    let mut url = Url::parse(base).map_err(|e| ProtoError::InvalidRelayUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" => "ws",
        "wss" => "wss",
        other => {
            return Err(ProtoError::InvalidRelayUrl {
                url: base.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ProtoError::InvalidRelayUrl {
            url: base.to_string(),
            reason: "scheme rewrite failed".to_string(),
        })?;

    let path = format!("{}/gateway", url.path().trim_end_matches('/'));
    url.set_path(&path);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_becomes_ws() {
        let url = relay_url("http://gw.local").unwrap();
        assert_eq!(url.as_str(), "ws://gw.local/gateway");
    }

    #[test]
    fn test_https_becomes_wss() {
        let url = relay_url("https://gw.example.com:8443").unwrap();
        assert_eq!(url.as_str(), "wss://gw.example.com:8443/gateway");
    }

    #[test]
    fn test_ws_passes_through() {
        let url = relay_url("ws://127.0.0.1:9999").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9999/gateway");
    }

    #[test]
    fn test_trailing_slash_is_collapsed() {
        let url = relay_url("http://gw.local/").unwrap();
        assert_eq!(url.as_str(), "ws://gw.local/gateway");
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        assert!(relay_url("ftp://gw.local").is_err());
        assert!(relay_url("not a url").is_err());
    }

    #[test]
    fn test_header_pairs() {
        let headers = RelayHeaders::new("tok", TunnelTarget::new("c1", "10.0.0.5", 80));
        let pairs = headers.to_pairs();
        assert_eq!(pairs[0], ("x-tunnel-type", "lnk".to_string()));
        assert_eq!(pairs[1], ("x-tunnel-token", "tok".to_string()));
        assert_eq!(pairs[2], ("x-tunnel-link-edge", "c1".to_string()));
        assert_eq!(pairs[3], ("x-tunnel-link-host", "10.0.0.5".to_string()));
        assert_eq!(pairs[4], ("x-tunnel-link-port", "80".to_string()));
    }
}
