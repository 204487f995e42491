//! Tunnel manager: the single source of truth for live tunnels
//!
//! Sessions are keyed by the deterministic target identity, at most one
//! per target. Starting an already-running target is a no-op that returns
//! the existing identity, so CLI retries never leak listeners or ports.

use gridlink_proto::{relay_url, ProxyInfo, RelayHeaders, StartProxyParams, TunnelId, TunnelTarget};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::allocator::alloc_listener;
use crate::session::{SessionError, TunnelSession};

struct SessionEntry {
    info: ProxyInfo,
    session: TunnelSession,
    /// Flips to true after the entry has been removed from the map.
    gone_rx: watch::Receiver<bool>,
}

/// Owner of every live [`TunnelSession`].
pub struct TunnelManager {
    sessions: Arc<RwLock<HashMap<TunnelId, SessionEntry>>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a tunnel for the given target, or return the identity of the
    /// one already running for it.
    pub async fn start_session(&self, params: &StartProxyParams) -> Result<TunnelId, SessionError> {
        let target = TunnelTarget::new(
            params.link_edge_id.clone(),
            params.link_host.clone(),
            params.link_port,
        );
        let id = target.id();

        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(&id) {
                debug!("tunnel {} already running, start is a no-op", id);
                return Ok(id);
            }
        }

        let listener = alloc_listener(params.port).await?;
        let relay = relay_url(&params.ws_url)?;
        let headers = RelayHeaders::new(params.token.clone(), target.clone());
        let session = TunnelSession::start(id.clone(), listener, relay, headers)?;
        let local_port = session.local_port();

        let mut stopped_rx = session.stopped();
        let (gone_tx, gone_rx) = watch::channel(false);

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                // lost a start race; keep the winner
                session.stop();
                return Ok(id);
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    info: ProxyInfo {
                        id: id.clone(),
                        edge_id: target.edge_id.clone(),
                        host: target.host.clone(),
                        port: target.port,
                    },
                    session,
                    gone_rx,
                },
            );
        }

        // Deregister exactly once, when the session's listener has closed.
        let map = self.sessions.clone();
        let reaped = id.clone();
        tokio::spawn(async move {
            let _ = stopped_rx.wait_for(|stopped| *stopped).await;
            map.write().await.remove(&reaped);
            let _ = gone_tx.send(true);
            info!("tunnel {} deregistered", reaped);
        });

        info!(
            "started tunnel {} on 127.0.0.1:{} -> {}:{} (edge {})",
            id, local_port, target.host, target.port, target.edge_id
        );
        Ok(id)
    }

    /// Stop the tunnel with this identity. Unknown identities are a
    /// silent no-op; a present session is stopped and deregistered before
    /// this returns.
    pub async fn stop_session(&self, id: &TunnelId) -> Result<(), SessionError> {
        let mut gone_rx = {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                None => {
                    debug!("stop for unknown tunnel {} is a no-op", id);
                    return Ok(());
                }
                Some(entry) => {
                    entry.session.stop();
                    entry.gone_rx.clone()
                }
            }
        };

        let _ = gone_rx.wait_for(|gone| *gone).await;
        Ok(())
    }

    /// Snapshot of every live session's public info.
    pub async fn list_sessions(&self) -> Vec<ProxyInfo> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|entry| entry.info.clone()).collect()
    }

    /// Local port of a live session, if any.
    pub async fn local_port(&self, id: &TunnelId) -> Option<u16> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|entry| entry.session.local_port())
    }
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}
