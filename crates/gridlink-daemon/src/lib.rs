//! The gridlink daemon: tunnel sessions, the session manager, and the
//! local control server.
//!
//! A single daemon process owns every live tunnel. Each tunnel is one TCP
//! listener whose accepted connections are bridged 1:1 to outbound
//! WebSocket relay connections carrying the target metadata as handshake
//! headers. Short-lived CLI invocations drive the daemon through the
//! control server's newline-JSON channel on a loopback port.

pub mod allocator;
pub mod manager;
pub mod server;
pub mod session;

pub use manager::TunnelManager;
pub use server::ControlServer;
pub use session::{SessionError, TunnelSession};

use std::sync::Arc;
use tracing::info;

/// Daemon entry point: one [`TunnelManager`] for the process lifetime,
/// served by a control server on `127.0.0.1:<port>`.
///
/// Runs until the process is killed. Sessions are not persisted: on exit
/// they are simply gone, and the next CLI invocation re-issues
/// `startProxy`.
pub async fn run(port: u16) -> Result<(), SessionError> {
    let manager = Arc::new(TunnelManager::new());
    let server = ControlServer::bind(port, manager).await?;
    info!("daemon ready on 127.0.0.1:{}", port);
    server.run().await
}
