//! Control server: the daemon's request/response channel
//!
//! Listens on a loopback TCP port for newline-delimited JSON envelopes.
//! Each accepted connection gets a `{"type":"ready"}` frame first, then
//! requests are dispatched concurrently: a slow `startProxy` never blocks
//! a `getProxies` issued after it. Handler failures always come back as
//! `{code≠0, msg}` responses; nothing a client sends can take the daemon
//! down.

use gridlink_proto::{
    ControlRequest, ControlResponse, ServerHello, StartProxyParams, StopProxyParams, GET_PROXIES,
    START_PROXY, STOP_PROXY,
};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::manager::TunnelManager;
use crate::session::SessionError;

/// Control-plane server bound to `127.0.0.1:<port>`.
pub struct ControlServer {
    listener: TcpListener,
    manager: Arc<TunnelManager>,
}

impl ControlServer {
    pub async fn bind(port: u16, manager: Arc<TunnelManager>) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| SessionError::Bind {
                address: "127.0.0.1".to_string(),
                port,
                reason: e.to_string(),
            })?;
        Ok(Self { listener, manager })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, SessionError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept control connections until the process exits.
    pub async fn run(self) -> Result<(), SessionError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("control connection from {}", peer_addr);
                    let manager = self.manager.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, manager).await;
                        debug!("control connection from {} closed", peer_addr);
                    });
                }
                Err(e) => {
                    error!("control accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, manager: Arc<TunnelManager>) {
    let (read_half, mut write_half) = stream.into_split();

    // All responses (and the ready frame) funnel through one writer task
    // so concurrently dispatched handlers never interleave partial lines.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(mut line) = line_rx.recv().await {
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    match serde_json::to_string(&ServerHello::ready()) {
        Ok(hello) => {
            if line_tx.send(hello).await.is_err() {
                return;
            }
        }
        Err(e) => {
            error!("failed to encode ready frame: {}", e);
            return;
        }
    }

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                let manager = manager.clone();
                let line_tx = line_tx.clone();
                // one task per request; startProxy can be slow
                tokio::spawn(async move {
                    let response = dispatch(request, manager).await;
                    match serde_json::to_string(&response) {
                        Ok(encoded) => {
                            let _ = line_tx.send(encoded).await;
                        }
                        Err(e) => error!("failed to encode response: {}", e),
                    }
                });
            }
            Err(e) => {
                warn!("malformed control message: {}", e);
            }
        }
    }

    drop(line_tx);
    let _ = writer.await;
}

async fn dispatch(request: ControlRequest, manager: Arc<TunnelManager>) -> ControlResponse {
    let ControlRequest { id, kind, params } = request;
    match kind.as_str() {
        START_PROXY => match serde_json::from_value::<StartProxyParams>(params) {
            Ok(params) => match manager.start_session(&params).await {
                Ok(tunnel_id) => ControlResponse::ok(id, json!(tunnel_id.as_str())),
                Err(e) => ControlResponse::failed(id, e.to_string()),
            },
            Err(e) => ControlResponse::failed(id, format!("invalid startProxy params: {}", e)),
        },
        STOP_PROXY => match serde_json::from_value::<StopProxyParams>(params) {
            Ok(params) => match manager.stop_session(&params.id).await {
                Ok(()) => ControlResponse::ok(id, json!(true)),
                Err(e) => ControlResponse::failed(id, e.to_string()),
            },
            Err(e) => ControlResponse::failed(id, format!("invalid stopProxy params: {}", e)),
        },
        GET_PROXIES => {
            let proxies = manager.list_sessions().await;
            match serde_json::to_value(&proxies) {
                Ok(data) => ControlResponse::ok(id, data),
                Err(e) => ControlResponse::failed(id, e.to_string()),
            }
        }
        other => ControlResponse::failed(id, format!("unknown operation '{}'", other)),
    }
}
