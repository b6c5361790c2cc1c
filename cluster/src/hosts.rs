use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::Result;

/// Name of the hostfile handed to `mpirun --hostfile`.
pub const HOSTFILE_NAME: &str = "hostfile";

/// Elects the master: the lexicographically smallest host.
///
/// # Returns
/// `None` only for an empty host list.
pub fn master_host<S: AsRef<str>>(hosts: &[S]) -> Option<&str> {
    hosts.iter().map(|h| h.as_ref()).min()
}

/// Builds the `-H` value, `h1:n,h2:n,...`, keeping the input order.
pub fn host_string<S: AsRef<str>>(hosts: &[S], slots: usize) -> String {
    hosts
        .iter()
        .map(|h| format!("{}:{slots}", h.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// The `-H` value for a job confined to this machine.
pub fn local_host_string(slots: usize) -> String {
    format!("localhost:{slots}")
}

/// Writes one host per line into `dir/hostfile`, replacing any previous content.
///
/// # Returns
/// The path of the written file.
///
/// # Errors
/// Any io error while writing; the launch can't go on without the file.
pub fn write_hostfile<S: AsRef<str>>(dir: &Path, hosts: &[S]) -> Result<PathBuf> {
    let path = dir.join(HOSTFILE_NAME);
    let content = hosts
        .iter()
        .map(|h| h.as_ref())
        .collect::<Vec<_>>()
        .join("\n");

    fs::write(&path, content)?;
    debug!(path:? = path, hosts = hosts.len(); "hostfile written");
    Ok(path)
}
