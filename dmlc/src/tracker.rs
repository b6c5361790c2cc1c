//! Parameter-server tracker.
//!
//! Hands out the scheduler's address to every process through `DMLC_PS_ROOT_URI`
//! and `DMLC_PS_ROOT_PORT`, and runs the scheduler itself on this node.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, TcpListener},
    ops::Range,
};

use cluster::{LaunchCommand, LaunchError, Result, TrainScript};
use log::{info, warn};
use tokio::net::lookup_host;

/// Ports tried for the scheduler, in order.
pub const PORT_RANGE: Range<u16> = 9091..9999;

pub const ROLE_VAR: &str = "DMLC_ROLE";
pub const NUM_WORKER_VAR: &str = "DMLC_NUM_WORKER";
pub const NUM_SERVER_VAR: &str = "DMLC_NUM_SERVER";
pub const ROOT_URI_VAR: &str = "DMLC_PS_ROOT_URI";
pub const ROOT_PORT_VAR: &str = "DMLC_PS_ROOT_PORT";

/// The address of the parameter-server scheduler and the job's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    root_uri: String,
    root_port: u16,
    num_workers: usize,
    num_servers: usize,
}

impl Tracker {
    /// Picks the first port of `PORT_RANGE` free on every interface.
    ///
    /// `root_uri` is only handed out, the port is checked on the unspecified address.
    ///
    /// # Errors
    /// `InvalidArgs` for a job without servers, `Io` if no port is free.
    pub fn bind(root_uri: &str, num_workers: usize, num_servers: usize) -> Result<Self> {
        Self::bind_in(root_uri, PORT_RANGE, num_workers, num_servers)
    }

    /// Same as `bind` over a custom port range.
    pub fn bind_in(
        root_uri: &str,
        ports: Range<u16>,
        num_workers: usize,
        num_servers: usize,
    ) -> Result<Self> {
        if num_servers == 0 {
            return Err(LaunchError::InvalidArgs(
                "the allreduce tracker isn't supported, at least one server is required".into(),
            ));
        }

        let root_port = free_port(ports.clone()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("no free port in {ports:?}"),
            )
        })?;

        info!(root_uri = root_uri, root_port = root_port; "scheduler address chosen");
        Ok(Self {
            root_uri: root_uri.to_string(),
            root_port,
            num_workers,
            num_servers,
        })
    }

    pub fn root_port(&self) -> u16 {
        self.root_port
    }

    /// Variables every worker, server and the scheduler get.
    pub fn envs(&self) -> Vec<(String, String)> {
        vec![
            (NUM_WORKER_VAR.into(), self.num_workers.to_string()),
            (NUM_SERVER_VAR.into(), self.num_servers.to_string()),
            (ROOT_URI_VAR.into(), self.root_uri.clone()),
            (ROOT_PORT_VAR.into(), self.root_port.to_string()),
        ]
    }

    /// The scheduler process, run locally with `DMLC_ROLE=scheduler`.
    pub fn scheduler_command(&self, script: &TrainScript) -> LaunchCommand {
        self.envs()
            .into_iter()
            .fold(script.to_command(), |cmd, (k, v)| cmd.env(k, v))
            .env(ROLE_VAR, "scheduler")
    }
}

fn free_port(ports: Range<u16>) -> Option<u16> {
    ports
        .into_iter()
        .find(|port| TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port)).is_ok())
}

/// Resolves `host` to the address other nodes use to reach the scheduler.
///
/// Falls back to `host` itself if it doesn't resolve.
pub async fn resolve_root_uri(host: &str) -> String {
    let addrs = match lookup_host((host, 0)).await {
        Ok(addrs) => addrs.map(|a| a.ip()).collect::<Vec<_>>(),
        Err(e) => {
            warn!("failed to resolve {host}: {e}");
            return host.to_string();
        }
    };

    addrs
        .iter()
        .find(|ip| matches!(ip, IpAddr::V4(v4) if !v4.is_loopback()))
        .or_else(|| addrs.first())
        .map_or_else(|| host.to_string(), IpAddr::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_busy_ports() {
        let busy = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = busy.local_addr().unwrap().port();

        let tracker = Tracker::bind_in("127.0.0.1", port..port.saturating_add(50), 4, 2).unwrap();
        assert_ne!(tracker.root_port(), port);
        assert!(tracker.root_port() > port);
    }

    #[test]
    fn exhausted_range_is_an_io_error() {
        let busy = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = busy.local_addr().unwrap().port();

        let err = Tracker::bind_in("127.0.0.1", port..port + 1, 4, 2).unwrap_err();
        assert!(matches!(err, LaunchError::Io(_)));
    }

    #[test]
    fn unresolvable_root_uri_still_gets_a_port() {
        let tracker = Tracker::bind_in("no-such-host.invalid", 20000..21000, 1, 1).unwrap();
        let envs = tracker.envs();

        assert!(envs.contains(&(ROOT_URI_VAR.to_string(), "no-such-host.invalid".to_string())));
        assert!((20000..21000).contains(&tracker.root_port()));
    }

    #[test]
    fn serverless_jobs_are_rejected() {
        let err = Tracker::bind("127.0.0.1", 4, 0).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgs(_)));
    }

    #[test]
    fn scheduler_gets_role_and_address() {
        let tracker = Tracker::bind_in("127.0.0.1", 20000..21000, 8, 2).unwrap();
        let script = TrainScript::new(
            "python",
            "train.py",
            vec!["--kv-store".into(), "dist_sync".into()],
        );

        let cmd = tracker.scheduler_command(&script);
        assert_eq!(cmd.to_string(), "python train.py --kv-store dist_sync");

        let envs = cmd.get_envs();
        let get = |k: &str| {
            envs.iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get(ROLE_VAR), Some("scheduler"));
        assert_eq!(get(NUM_WORKER_VAR), Some("8"));
        assert_eq!(get(NUM_SERVER_VAR), Some("2"));
        assert_eq!(get(ROOT_URI_VAR), Some("127.0.0.1"));
        assert_eq!(get(ROOT_PORT_VAR), Some(tracker.root_port().to_string().as_str()));
    }

    #[tokio::test]
    async fn resolves_ip_literals_to_themselves() {
        assert_eq!(resolve_root_uri("127.0.0.1").await, "127.0.0.1");
    }

    #[tokio::test]
    async fn unresolvable_host_falls_back_to_name() {
        assert_eq!(
            resolve_root_uri("no-such-host.invalid").await,
            "no-such-host.invalid"
        );
    }
}
