use std::path::PathBuf;

use crate::{
    cli::LauncherArgs,
    command::TrainScript,
    ssh::{DEFAULT_SSHD_PATH, SshGate},
    supervisor::WatchConfig,
};

const DEFAULT_PYTHON: &str = "python";

/// Everything a launcher needs besides the `TrainingWorld`.
///
/// Built once in `main` and handed down by reference.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub args: LauncherArgs,
    /// Interpreter that runs the training script.
    pub python: String,
    pub sshd_path: String,
    pub ssh: SshGate,
    pub watch: WatchConfig,
    /// Where the hostfile is written.
    pub hostfile_dir: PathBuf,
}

impl LaunchConfig {
    /// Creates a config with the default timings, writing the hostfile to the working dir.
    pub fn new(args: LauncherArgs) -> Self {
        Self {
            args,
            python: DEFAULT_PYTHON.to_string(),
            sshd_path: DEFAULT_SSHD_PATH.to_string(),
            ssh: SshGate::default(),
            watch: WatchConfig::default(),
            hostfile_dir: PathBuf::from("."),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_ssh(mut self, ssh: SshGate) -> Self {
        self.ssh = ssh;
        self
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_hostfile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hostfile_dir = dir.into();
        self
    }

    /// The training invocation built from the parsed arguments.
    pub fn train_script(&self) -> TrainScript {
        TrainScript::new(
            &self.python,
            &self.args.train_script,
            self.args.train_args.clone(),
        )
    }
}
