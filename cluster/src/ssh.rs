use std::{collections::BTreeSet, process::Stdio, time::Duration};

use futures::future::join_all;
use log::{debug, info};
use tokio::{
    net::TcpStream,
    process::{Child, Command},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::error::{LaunchError, Result};

pub const SSH_PORT: u16 = 22;
pub const DEFAULT_SSHD_PATH: &str = "/usr/sbin/sshd";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Starts `sshd -D` in the background so peers can reach this node.
///
/// The returned child must outlive the launch.
pub fn start_daemon(path: &str) -> Result<Child> {
    let child = Command::new(path)
        .arg("-D")
        .stdin(Stdio::null())
        .spawn()?;

    info!(path = path, pid:? = child.id(); "sshd started");
    Ok(child)
}

/// Blocks the master until every worker accepts tcp connections on the ssh port.
#[derive(Debug, Clone)]
pub struct SshGate {
    port: u16,
    interval: Duration,
    timeout: Duration,
}

impl Default for SshGate {
    fn default() -> Self {
        Self {
            port: SSH_PORT,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SshGate {
    pub fn new(port: u16, interval: Duration, timeout: Duration) -> Self {
        Self {
            port,
            interval,
            timeout,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polls every pending host until all of them connect.
    ///
    /// Every host, name or ip literal, is probed on the gate's port. Each
    /// round probes the pending hosts concurrently and then sleeps for the
    /// interval.
    ///
    /// # Errors
    /// `SshTimeout` with the still pending hosts once the deadline passes,
    /// `Interrupted` if `token` is cancelled first.
    pub async fn wait<I, S>(&self, hosts: I, token: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pending: BTreeSet<String> = hosts.into_iter().map(Into::into).collect();
        let deadline = Instant::now() + self.timeout;

        let polled = tokio::select! {
            res = time::timeout_at(deadline, self.poll(&mut pending)) => res,
            _ = token.cancelled() => return Err(LaunchError::Interrupted),
        };

        match polled {
            Ok(()) => {
                info!("all hosts are reachable over ssh");
                Ok(())
            }
            Err(_) => Err(LaunchError::SshTimeout {
                pending: pending.into_iter().collect(),
                timeout: self.timeout,
            }),
        }
    }

    async fn poll(&self, pending: &mut BTreeSet<String>) {
        while !pending.is_empty() {
            info!("hosts that aren't sshable yet: {pending:?}");

            let probes = pending.iter().map(|host| async move {
                let reachable = self.can_connect(host).await;
                (host.clone(), reachable)
            });

            let results = join_all(probes).await;
            for (host, reachable) in results {
                if reachable {
                    debug!(host = host.as_str(); "can connect");
                    pending.remove(&host);
                } else {
                    debug!(host = host.as_str(); "can't connect");
                }
            }

            if pending.is_empty() {
                break;
            }

            time::sleep(self.interval).await;
        }
    }

    async fn can_connect(&self, host: &str) -> bool {
        TcpStream::connect((host, self.port)).await.is_ok()
    }
}
