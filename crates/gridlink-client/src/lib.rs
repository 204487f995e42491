//! Control client for talking to the gridlink daemon
//!
//! Callers get one method per operation and never see the plumbing: the
//! client connects to the daemon's loopback port (spawning the daemon
//! first if nothing is listening), correlates concurrent requests by
//! random id over the single shared connection, and turns `{code≠0}`
//! responses into typed errors distinct from transport failures.

mod spawn;

pub use spawn::{ensure_client, spawn_daemon, LogPaths};

use gridlink_proto::{
    ControlRequest, ControlResponse, ProxyInfo, ServerHello, StartProxyParams, StopProxyParams,
    TunnelId, GET_PROXIES, START_PROXY, STOP_PROXY,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long a connection attempt may take before we assume no daemon is
/// listening.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Control-plane client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// No daemon was reachable, even after spawning one.
    #[error("daemon is not reachable, even after starting it")]
    DaemonUnavailable,

    /// The connection itself failed; any in-flight request may or may
    /// not have been executed.
    #[error("control connection failed: {0}")]
    Transport(String),

    /// The daemon executed the request and reported failure.
    #[error("{msg}")]
    Operation { code: i32, msg: String },

    #[error("control protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ControlResponse>>>>;

/// One connection to the daemon, shared by any number of concurrent
/// [`send`](ControlClient::send) calls.
#[derive(Debug)]
pub struct ControlClient {
    pending: PendingMap,
    writer: mpsc::Sender<String>,
    /// Flips to true when the reader task exits; the connection is dead.
    closed: watch::Receiver<bool>,
}

impl ControlClient {
    /// Connect to the daemon on `127.0.0.1:<port>` and wait for its
    /// ready frame. Does not spawn anything; see [`ensure_client`] for
    /// the auto-spawn path.
    pub async fn connect(port: u16) -> Result<Self, ClientError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
            .await
            .map_err(|_| ClientError::Transport(format!("connect to port {} timed out", port)))?
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // the daemon announces readiness before accepting requests
        let hello = timeout(CONNECT_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| ClientError::Transport("timed out waiting for ready".to_string()))?
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .ok_or_else(|| ClientError::Transport("connection closed before ready".to_string()))?;
        let hello: ServerHello = serde_json::from_str(&hello)?;
        if !hello.is_ready() {
            return Err(ClientError::Protocol(format!(
                "expected ready frame, got '{}'",
                hello.kind
            )));
        }
        debug!("connected to daemon on port {}", port);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer, mut writer_rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            while let Some(mut line) = writer_rx.recv().await {
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: route each response to its pending entry. When the
        // connection drops, dropping the leftover senders rejects every
        // still-pending request instead of letting callers hang. The
        // closed flag is raised before the final clear, so `send` can
        // reject entries registered after it.
        let (closed_tx, closed) = watch::channel(false);
        let pending_for_reader = pending.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<ControlResponse>(&line) {
                    Ok(response) => {
                        let entry = pending_for_reader.lock().await.remove(&response.id);
                        match entry {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!("response for unknown request id {}", response.id),
                        }
                    }
                    Err(e) => warn!("malformed daemon response: {}", e),
                }
            }
            let _ = closed_tx.send(true);
            pending_for_reader.lock().await.clear();
        });

        Ok(Self {
            pending,
            writer,
            closed,
        })
    }

    /// Send one request and await its correlated response.
    pub async fn send(&self, kind: &str, params: Value) -> Result<Value, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader clears the pending map only once, at exit; an entry
        // registered after that has to be rejected here.
        if *self.closed.borrow() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Transport("connection closed".to_string()));
        }

        let request = ControlRequest::new(&id, kind, params);
        let line = serde_json::to_string(&request)?;
        if self.writer.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Transport("connection closed".to_string()));
        }

        let response = rx.await.map_err(|_| {
            ClientError::Transport("connection closed before the response arrived".to_string())
        })?;

        if response.is_ok() {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(ClientError::Operation {
                code: response.code,
                msg: response.msg.unwrap_or_else(|| "operation failed".to_string()),
            })
        }
    }

    /// Start (or rejoin) a tunnel; returns its identity.
    pub async fn start_proxy(&self, params: &StartProxyParams) -> Result<TunnelId, ClientError> {
        let data = self.send(START_PROXY, serde_json::to_value(params)?).await?;
        let raw = data
            .as_str()
            .ok_or_else(|| ClientError::Protocol("startProxy returned no identity".to_string()))?;
        Ok(TunnelId::from_raw(raw))
    }

    /// Stop a tunnel by identity. Stopping an unknown identity succeeds.
    pub async fn stop_proxy(&self, id: &TunnelId) -> Result<(), ClientError> {
        let params = StopProxyParams { id: id.clone() };
        self.send(STOP_PROXY, serde_json::to_value(&params)?).await?;
        Ok(())
    }

    /// Snapshot of the daemon's live tunnels.
    pub async fn get_proxies(&self) -> Result<Vec<ProxyInfo>, ClientError> {
        let data = self.send(GET_PROXIES, serde_json::json!({})).await?;
        Ok(serde_json::from_value(data)?)
    }
}
