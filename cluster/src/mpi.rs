use std::process::Stdio;

use log::debug;
use tokio::process::Command;

use crate::{
    command::LaunchCommand,
    error::{LaunchError, Result},
};

/// The MPI implementation installed on this machine.
///
/// Only decides how environment variables are forwarded to ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpiFlavor {
    /// Open MPI (or its OpenRTE runtime), `-x K=V`.
    OpenMpi,
    /// MPICH and MS-MPI, `-env K V`.
    Mpich,
}

impl MpiFlavor {
    /// Detects the flavor from `mpirun --version` output.
    ///
    /// # Errors
    /// `UnsupportedMpi` if the output names no known implementation.
    pub fn detect(version_output: &str) -> Result<Self> {
        if version_output.contains("Open MPI") || version_output.contains("OpenRTE") {
            Ok(Self::OpenMpi)
        } else if version_output.contains("mpich") {
            Ok(Self::Mpich)
        } else {
            Err(LaunchError::UnsupportedMpi(version_output.to_string()))
        }
    }

    /// Runs `mpirun --version` and detects the flavor from its stdout.
    ///
    /// On Windows MS-MPI is assumed without asking.
    pub async fn probe() -> Result<Self> {
        if cfg!(windows) {
            return Ok(Self::Mpich);
        }

        let out = Command::new("mpirun")
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&out.stdout);
        debug!(status:? = out.status; "mpirun --version: {}", stdout.trim());
        Self::detect(&stdout)
    }

    /// Appends the forwarding flags for every `(name, value)` pair to `cmd`.
    pub fn forward_env<'a, I>(self, mut cmd: LaunchCommand, envs: I) -> LaunchCommand
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in envs {
            cmd = match self {
                Self::OpenMpi => cmd.export(format!("{name}={value}")),
                Self::Mpich => cmd.arg("-env").arg(name).arg(value),
            };
        }
        cmd
    }

    /// The launcher binary for job groups on this platform.
    pub fn launcher() -> &'static str {
        if cfg!(windows) { "mpiexec" } else { "mpirun" }
    }
}
