//! Daemon bootstrap
//!
//! When no daemon is listening on the workspace's control port, the CLI
//! starts one itself: the current executable re-invoked as
//! `daemon --port <N>`, detached so it outlives the CLI process, with
//! stdout/stderr appended to the workspace log files.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::info;

use crate::{ClientError, ControlClient};

/// Delay between spawning the daemon and the single reconnect attempt.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Where a spawned daemon's output goes.
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub log: PathBuf,
    pub err: PathBuf,
}

/// Connect to the daemon, spawning it first if nothing answers.
///
/// The spawn-and-retry applies only to establishing the connection; a
/// failed *operation* on a healthy connection is never retried here.
pub async fn ensure_client(port: u16, logs: &LogPaths) -> Result<ControlClient, ClientError> {
    match ControlClient::connect(port).await {
        Ok(client) => Ok(client),
        Err(e) => {
            info!("no daemon on port {} ({}), starting one", port, e);
            spawn_daemon(port, logs)?;
            tokio::time::sleep(SETTLE_DELAY).await;
            ControlClient::connect(port)
                .await
                .map_err(|_| ClientError::DaemonUnavailable)
        }
    }
}

/// Start the daemon as a detached background process and return without
/// waiting for it.
pub fn spawn_daemon(port: u16, logs: &LogPaths) -> Result<(), ClientError> {
    let exe = std::env::current_exe()?;
    let log = OpenOptions::new().create(true).append(true).open(&logs.log)?;
    let err = OpenOptions::new().create(true).append(true).open(&logs.err)?;

    let mut command = Command::new(exe);
    command
        .arg("daemon")
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(err);

    // own process group: the daemon must survive this CLI exiting
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn()?;
    info!("started daemon process pid {}", child.id());
    // the child handle is dropped, never waited on
    Ok(())
}
