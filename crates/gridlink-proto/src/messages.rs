//! Control-plane message envelopes
//!
//! Requests and responses are single JSON objects, newline-delimited on the
//! wire. The daemon echoes the request `id` back verbatim so the client can
//! correlate responses that arrive out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::TunnelId;

/// Operation selector for `startProxy`
pub const START_PROXY: &str = "startProxy";
/// Operation selector for `stopProxy`
pub const STOP_PROXY: &str = "stopProxy";
/// Operation selector for `getProxies`
pub const GET_PROXIES: &str = "getProxies";

/// Client-to-daemon request envelope: `{id, type, params}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    /// Correlation id, opaque to the daemon
    pub id: String,
    /// Operation selector
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation parameters, decoded per operation
    #[serde(default)]
    pub params: Value,
}

impl ControlRequest {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params,
        }
    }
}

/// Daemon-to-client response envelope: `{id, code, data|msg}`.
///
/// `code` 0 means success with a payload in `data`; any other value means
/// failure with a human-readable `msg`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResponse {
    pub id: String,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ControlResponse {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            code: 0,
            data: Some(data),
            msg: None,
        }
    }

    pub fn failed(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: 1,
            data: None,
            msg: Some(msg.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// First frame the daemon writes on every accepted control connection.
///
/// Lets a freshly spawned client distinguish "daemon up and accepting
/// requests" from "connection accepted but not yet initialized".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerHello {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ServerHello {
    pub const READY: &'static str = "ready";

    pub fn ready() -> Self {
        Self {
            kind: Self::READY.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.kind == Self::READY
    }
}

/// Parameters of a `startProxy` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartProxyParams {
    /// Relay base endpoint (http/https, rewritten to ws/wss)
    pub ws_url: String,
    /// Desired local port; absent means "allocate an ephemeral one"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Bearer token forwarded to the gateway
    pub token: String,
    /// Remote target host
    pub link_host: String,
    /// Remote target port
    pub link_port: u16,
    /// Remote cluster / edge id
    pub link_edge_id: String,
}

/// Parameters of a `stopProxy` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopProxyParams {
    pub id: TunnelId,
}

/// One element of the `getProxies` response payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub id: TunnelId,
    pub edge_id: String,
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = ControlRequest::new("abc", GET_PROXIES, json!({}));
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"id":"abc","type":"getProxies","params":{}}"#);
    }

    #[test]
    fn test_request_deserialization_without_params() {
        let req: ControlRequest = serde_json::from_str(r#"{"id":"x","type":"getProxies"}"#).unwrap();
        assert_eq!(req.kind, GET_PROXIES);
        assert_eq!(req.params, Value::Null);
    }

    #[test]
    fn test_start_proxy_params_wire_format() {
        let params = StartProxyParams {
            ws_url: "http://gw.local".to_string(),
            port: Some(9000),
            token: "t0k".to_string(),
            link_host: "10.0.0.5".to_string(),
            link_port: 80,
            link_edge_id: "c1".to_string(),
        };
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(
            json,
            r#"{"wsUrl":"http://gw.local","port":9000,"token":"t0k","linkHost":"10.0.0.5","linkPort":80,"linkEdgeId":"c1"}"#
        );

        // port omitted entirely when absent
        let params = StartProxyParams { port: None, ..params };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("port"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = ControlResponse::ok("r1", json!(true));
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"id":"r1","code":0,"data":true}"#
        );

        let resp = ControlResponse::failed("r2", "no such tunnel");
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"id":"r2","code":1,"msg":"no such tunnel"}"#
        );
        assert!(!resp.is_ok());
    }

    #[test]
    fn test_ready_frame() {
        let hello = ServerHello::ready();
        assert_eq!(serde_json::to_string(&hello).unwrap(), r#"{"type":"ready"}"#);

        let parsed: ServerHello = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(parsed.is_ready());
    }

    #[test]
    fn test_proxy_info_wire_format() {
        let info = ProxyInfo {
            id: TunnelId::from_raw("deadbeef"),
            edge_id: "c1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 80,
        };
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"id":"deadbeef","edgeId":"c1","host":"10.0.0.5","port":80}"#
        );
    }
}
