//! Wire types shared between the gridlink CLI, control client, and daemon.
//!
//! Two protocols live here:
//!
//! - The **control plane**: newline-delimited JSON envelopes exchanged
//!   between a short-lived CLI invocation and the long-lived daemon over a
//!   loopback TCP connection ([`ControlRequest`], [`ControlResponse`],
//!   [`ServerHello`]).
//! - The **relay handshake**: the metadata headers and URL convention used
//!   when the daemon opens a WebSocket to the remote gateway on behalf of a
//!   bridged TCP connection ([`headers`], [`relay_url`]).

pub mod identity;
pub mod messages;
pub mod relay;

pub use identity::{TunnelId, TunnelTarget};
pub use messages::{
    ControlRequest, ControlResponse, ProxyInfo, ServerHello, StartProxyParams, StopProxyParams,
    GET_PROXIES, START_PROXY, STOP_PROXY,
};
pub use relay::{headers, relay_url, RelayHeaders};

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid relay endpoint '{url}': {reason}")]
    InvalidRelayUrl { url: String, reason: String },
}
