use std::fmt;

use cluster::{LaunchCommand, LaunchError, MpiFlavor, Result, supervisor};
use futures::future::try_join_all;
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{opts::DmlcOpts, tracker::ROLE_VAR};

pub const JOB_CLUSTER_VAR: &str = "DMLC_JOB_CLUSTER";

/// The part a process group plays in the parameter-server job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starts the worker and server groups through the parallel launcher.
#[derive(Debug, Clone)]
pub struct Submitter {
    launcher: LaunchCommand,
    flavor: MpiFlavor,
}

impl Submitter {
    /// Uses the platform's launcher binary.
    pub fn new(flavor: MpiFlavor) -> Self {
        Self::with_launcher(LaunchCommand::new(MpiFlavor::launcher()), flavor)
    }

    /// Uses `launcher`, program and leading arguments, in front of every group line.
    pub fn with_launcher(launcher: LaunchCommand, flavor: MpiFlavor) -> Self {
        Self { launcher, flavor }
    }

    /// The launcher line for one group: `mpirun -n <count> <envs> [--hostfile f] <command>`.
    ///
    /// # Arguments
    /// * `role` - Exported as `DMLC_ROLE`.
    /// * `count` - Processes in the group.
    /// * `envs` - The tracker's variables, forwarded before the role.
    /// * `opts` - Hostfile and training command.
    pub fn group_command(
        &self,
        role: Role,
        count: usize,
        envs: &[(String, String)],
        opts: &DmlcOpts,
    ) -> LaunchCommand {
        let cmd = self
            .launcher
            .clone()
            .arg("-n")
            .arg(count.to_string());

        let forwarded = envs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain([(JOB_CLUSTER_VAR, "mpi"), (ROLE_VAR, role.as_str())]);
        let cmd = self.flavor.forward_env(cmd, forwarded);

        let cmd = match &opts.host_file {
            Some(path) => cmd.arg("--hostfile").arg(path.display().to_string()),
            None => cmd,
        };

        cmd.args(opts.command.to_command().tokens())
    }

    /// Launches every non-empty group and waits for all of them.
    ///
    /// Groups run concurrently, each as its own task.
    ///
    /// # Errors
    /// The first group failure, as soon as it happens.
    pub async fn submit(
        &self,
        opts: &DmlcOpts,
        envs: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<()> {
        let groups = [
            (Role::Worker, opts.num_workers),
            (Role::Server, opts.num_servers),
        ];

        let jobs = groups
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(role, count)| {
                info!("start {count} {role}s by {}", self.launcher.program());
                let cmd = self.group_command(role, count, envs, opts);
                spawn_group(cmd, token.clone())
            })
            .collect::<Vec<_>>();

        try_join_all(jobs.into_iter().map(join)).await?;
        Ok(())
    }
}

fn spawn_group(cmd: LaunchCommand, token: CancellationToken) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { supervisor::run_master(&cmd, &token).await })
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .await
        .map_err(|e| LaunchError::Io(std::io::Error::other(e)))?
}
