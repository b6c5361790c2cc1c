use std::path::PathBuf;

use cluster::{
    LaunchConfig, LaunchError, Result, TrainScript, TrainingWorld, hosts::write_hostfile,
};

/// What the tracker needs to start a parameter-server job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlcOpts {
    /// Worker processes, one per device of a node.
    pub num_workers: usize,
    /// Server processes, one per node.
    pub num_servers: usize,
    /// Hostfile handed to `mpirun --hostfile`.
    pub host_file: Option<PathBuf>,
    /// The training invocation every process runs.
    pub command: TrainScript,
}

impl DmlcOpts {
    /// Derives the options from the cluster, writing the hostfile on the way.
    ///
    /// # Errors
    /// An io error if the hostfile can't be written.
    pub fn from_world(world: &TrainingWorld, config: &LaunchConfig) -> Result<Self> {
        let host_file = write_hostfile(&config.hostfile_dir, world.hosts())?;

        Self::new(
            world.processes_per_node(),
            world.node_count(),
            Some(host_file),
            config.train_script(),
        )
    }

    /// # Errors
    /// `InvalidArgs` if no worker would be started.
    pub fn new(
        num_workers: usize,
        num_servers: usize,
        host_file: Option<PathBuf>,
        command: TrainScript,
    ) -> Result<Self> {
        if num_workers == 0 {
            return Err(LaunchError::InvalidArgs(
                "at least one worker is required".into(),
            ));
        }

        Ok(Self {
            num_workers,
            num_servers,
            host_file,
            command,
        })
    }
}
