use std::{collections::HashSet, env, fmt, str::FromStr};

use serde::Serialize;

use crate::{
    error::{LaunchError, Result},
    hosts,
};

pub const NUM_GPUS_VAR: &str = "SM_NUM_GPUS";
pub const NUM_CPUS_VAR: &str = "SM_NUM_CPUS";
pub const HOSTS_VAR: &str = "SM_HOSTS";
pub const CURRENT_HOST_VAR: &str = "SM_CURRENT_HOST";
pub const NETWORK_INTERFACE_VAR: &str = "SM_NETWORK_INTERFACE_NAME";

/// Snapshot of the cluster topology as seen by this launcher instance.
///
/// Built once at startup and passed around by reference, nothing re-reads
/// the environment afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingWorld {
    processes_per_node: usize,
    hosts: Vec<String>,
    current_host: String,
    machine_rank: usize,
    is_master: bool,
    network_interface: Option<String>,
}

impl TrainingWorld {
    /// Reads the world from the process environment.
    ///
    /// # Errors
    /// `MissingEnv` or `InvalidEnv` naming the first offending variable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the world through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// `MissingEnv` or `InvalidEnv` naming the first offending variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| lookup(name).ok_or(LaunchError::MissingEnv(name));

        let num_gpus: usize = parse_count(NUM_GPUS_VAR, require(NUM_GPUS_VAR)?)?;
        let num_cpus: usize = parse_count(NUM_CPUS_VAR, require(NUM_CPUS_VAR)?)?;

        let raw_hosts = require(HOSTS_VAR)?;
        let hosts: Vec<String> =
            serde_json::from_str(&raw_hosts).map_err(|e| LaunchError::InvalidEnv {
                name: HOSTS_VAR,
                value: raw_hosts.clone(),
                reason: e.to_string(),
            })?;

        let current_host = require(CURRENT_HOST_VAR)?;
        let network_interface = lookup(NETWORK_INTERFACE_VAR).filter(|s| !s.is_empty());

        let processes_per_node = if num_gpus > 0 { num_gpus } else { num_cpus };
        if processes_per_node == 0 {
            return Err(LaunchError::InvalidEnv {
                name: NUM_CPUS_VAR,
                value: num_cpus.to_string(),
                reason: "no gpus and no cpus to run on".into(),
            });
        }

        Self::new(hosts, current_host, processes_per_node, network_interface)
            .map_err(|reason| invalid(&raw_hosts, reason))
    }

    /// Creates a world from already parsed values.
    ///
    /// # Errors
    /// A description of the problem when the host list is empty, has
    /// duplicates, doesn't contain `current_host`, or `processes_per_node` is zero.
    pub fn new(
        hosts: Vec<String>,
        current_host: String,
        processes_per_node: usize,
        network_interface: Option<String>,
    ) -> std::result::Result<Self, String> {
        if hosts.is_empty() {
            return Err("host list is empty".into());
        }

        let mut seen = HashSet::with_capacity(hosts.len());
        if let Some(dup) = hosts.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(format!("host {dup} appears more than once"));
        }

        if processes_per_node == 0 {
            return Err("neither gpus nor cpus are available".into());
        }

        let machine_rank = hosts
            .iter()
            .position(|h| *h == current_host)
            .ok_or_else(|| format!("current host {current_host} is not in the host list"))?;

        let is_master = hosts::master_host(&hosts) == Some(current_host.as_str());

        Ok(Self {
            processes_per_node,
            hosts,
            current_host,
            machine_rank,
            is_master,
            network_interface,
        })
    }

    /// Processes started on every node: the gpu count, or the cpu count without gpus.
    pub fn processes_per_node(&self) -> usize {
        self.processes_per_node
    }

    pub fn node_count(&self) -> usize {
        self.hosts.len()
    }

    /// Processes in the whole job.
    pub fn total_size(&self) -> usize {
        self.processes_per_node * self.node_count()
    }

    /// Hosts in platform order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn current_host(&self) -> &str {
        &self.current_host
    }

    pub fn machine_rank(&self) -> usize {
        self.machine_rank
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// The host every other node defers to.
    pub fn master_host(&self) -> &str {
        // `new` rejects empty host lists.
        hosts::master_host(&self.hosts).unwrap_or(&self.current_host)
    }

    /// Every host except this one.
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .map(String::as_str)
            .filter(|h| *h != self.current_host)
    }

    pub fn network_interface(&self) -> Option<&str> {
        self.network_interface.as_deref()
    }

    /// Returns the network interface or the error for its absence.
    pub fn require_network_interface(&self) -> Result<&str> {
        self.network_interface()
            .ok_or(LaunchError::MissingEnv(NETWORK_INTERFACE_VAR))
    }
}

/// Renders as the json object logged at startup.
impl fmt::Display for TrainingWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

fn parse_count<T: FromStr>(name: &'static str, value: String) -> Result<T>
where
    T::Err: ToString,
{
    let parsed = value.trim().parse();
    parsed.map_err(|e: T::Err| LaunchError::InvalidEnv {
        name,
        value,
        reason: e.to_string(),
    })
}

fn invalid(raw_hosts: &str, reason: String) -> LaunchError {
    LaunchError::InvalidEnv {
        name: HOSTS_VAR,
        value: raw_hosts.to_string(),
        reason,
    }
}
