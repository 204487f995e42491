//! Local port allocation
//!
//! Sessions get their listener from here. The listener is bound directly
//! on the port the tunnel will use, so there is no probe-and-release
//! window in which another process could grab it.

use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::session::SessionError;

/// Bind a loopback listener on the requested port, or on an OS-chosen
/// ephemeral port when `port` is `None`.
pub async fn alloc_listener(port: Option<u16>) -> Result<TcpListener, SessionError> {
    let port = port.unwrap_or(0);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| SessionError::Bind {
            address: "127.0.0.1".to_string(),
            port,
            reason: e.to_string(),
        })
}

/// Probe for a free ephemeral port and release it again.
///
/// Only for ports that are handed to a *different* process to bind later
/// (the persisted daemon port). The port can be taken by someone else
/// between release and rebind; tunnel listeners never use this path.
pub fn probe_free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alloc_ephemeral_listener() {
        let listener = alloc_listener(None).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_alloc_busy_port_is_bind_error() {
        let first = alloc_listener(None).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let err = alloc_listener(Some(port)).await.unwrap_err();
        match err {
            SessionError::Bind { port: p, .. } => assert_eq!(p, port),
            other => panic!("expected bind error, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_free_port() {
        let port = probe_free_port().unwrap();
        assert_ne!(port, 0);
    }
}
