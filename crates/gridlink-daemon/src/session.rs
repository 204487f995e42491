//! Tunnel session: one TCP listener bridged to the relay gateway
//!
//! Every TCP connection accepted on the listener gets its own outbound
//! WebSocket to the gateway, opened with the tunnel's metadata headers.
//! Bytes are shuttled both ways as opaque binary frames until either side
//! closes; closing one side closes the other. Bridged connections are
//! fully independent: a relay failure or client disconnect on one never
//! touches the listener or the other bridges.

use futures_util::{SinkExt, StreamExt};
use gridlink_proto::{ProtoError, RelayHeaders, TunnelId};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Tunnel-side errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {address}:{port}: {reason}")]
    Bind {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("failed to connect relay {url}: {reason}")]
    RelayConnect { url: String, reason: String },

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

/// A live tunnel: the accept loop runs as a background task until
/// [`stop`](TunnelSession::stop) is called or the process exits.
pub struct TunnelSession {
    id: TunnelId,
    local_port: u16,
    stop_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

impl TunnelSession {
    /// Start the accept loop on an already-bound listener.
    ///
    /// The listener is bound by the caller (see [`crate::allocator`]) so
    /// the chosen port is never released between allocation and use.
    pub fn start(
        id: TunnelId,
        listener: TcpListener,
        relay: Url,
        headers: RelayHeaders,
    ) -> Result<Self, SessionError> {
        let local_port = listener.local_addr()?.port();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let session_id = id.clone();
        tokio::spawn(async move {
            accept_loop(session_id, listener, relay, headers, stop_rx).await;
            let _ = stopped_tx.send(true);
        });

        Ok(Self {
            id,
            local_port,
            stop_tx,
            stopped_rx,
        })
    }

    /// Stable identity of the remote target. Independent of the local
    /// port and token; this is the manager's deduplication key.
    pub fn id(&self) -> &TunnelId {
        &self.id
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Close the listener. No new connections are accepted; bridges that
    /// are already up drain naturally. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Observe the stopped event. The value flips to `true` exactly once,
    /// after the listener has been closed.
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped_rx.clone()
    }
}

async fn accept_loop(
    id: TunnelId,
    listener: TcpListener,
    relay: Url,
    headers: RelayHeaders,
    mut stop_rx: watch::Receiver<bool>,
) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    info!("tunnel {} listening on 127.0.0.1:{}", id, port);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // a dropped sender counts as a stop
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    debug!("tunnel {}: accepted client {}", id, peer_addr);
                    let relay = relay.clone();
                    let headers = headers.clone();
                    let tunnel = id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge(socket, peer_addr, relay, headers).await {
                            // contained to this one bridged connection
                            warn!("tunnel {}: bridge for {} failed: {}", tunnel, peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("tunnel {}: accept failed: {}", id, e);
                }
            }
        }
    }

    drop(listener);
    info!("tunnel {} stopped", id);
}

/// Bridge one accepted TCP connection to a fresh relay WebSocket.
async fn bridge(
    socket: TcpStream,
    peer_addr: SocketAddr,
    relay: Url,
    headers: RelayHeaders,
) -> Result<(), SessionError> {
    let mut request =
        relay
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::RelayConnect {
                url: relay.to_string(),
                reason: e.to_string(),
            })?;
    for (name, value) in headers.to_pairs() {
        let value = HeaderValue::from_str(&value).map_err(|e| SessionError::RelayConnect {
            url: relay.to_string(),
            reason: format!("invalid header value for {}: {}", name, e),
        })?;
        request.headers_mut().insert(name, value);
    }

    let (ws, _response) = connect_async(request)
        .await
        .map_err(|e| SessionError::RelayConnect {
            url: relay.to_string(),
            reason: e.to_string(),
        })?;
    debug!("relay connection established for {}", peer_addr);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (mut tcp_rx, mut tcp_wx) = socket.into_split();
    let mut buf = vec![0u8; 16 * 1024];

    // Pure byte relay: TCP reads become binary frames, binary frames
    // become TCP writes, in order on each leg. Either side closing ends
    // the bridge and closes the opposite side.
    loop {
        tokio::select! {
            read = tcp_rx.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("client {} closed, closing relay side", peer_addr);
                    let _ = ws_tx.close().await;
                    break;
                }
                Ok(n) => {
                    if ws_tx.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        let _ = tcp_wx.shutdown().await;
                        break;
                    }
                }
                Err(e) => {
                    debug!("client {} read error: {}, closing relay side", peer_addr, e);
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    if tcp_wx.write_all(&data).await.is_err() {
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("relay closed, closing client {}", peer_addr);
                    let _ = tcp_wx.shutdown().await;
                    break;
                }
                Some(Ok(_)) => {
                    // ping/pong/text are transport chatter, not tunnel bytes
                }
                Some(Err(e)) => {
                    debug!("relay error for {}: {}, closing client", peer_addr, e);
                    let _ = tcp_wx.shutdown().await;
                    break;
                }
            },
        }
    }

    Ok(())
}
