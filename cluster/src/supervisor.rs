use std::{io, pin::pin, process::ExitStatus, process::Stdio, time::Duration};

use futures::{Stream, StreamExt, stream};
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    command::LaunchCommand,
    error::{LaunchError, Result},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Runs the composed command on the master and forwards its output to stdout.
///
/// # Errors
/// `TrainingFailed` carrying the child's exit code if it didn't succeed.
pub async fn run_master(cmd: &LaunchCommand, token: &CancellationToken) -> Result<()> {
    run_master_with(cmd, token, |line| println!("{line}")).await
}

/// Same as `run_master`, handing every output line to `sink` instead.
///
/// Lines of stdout and stderr are interleaved as they arrive.
pub async fn run_master_with<F>(
    cmd: &LaunchCommand,
    token: &CancellationToken,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    info!("running {cmd}");
    let mut child = cmd.to_command().spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout isn't piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr isn't piped"))?;

    let run = async {
        let mut output = pin!(stream::select(lines(stdout), lines(stderr)));
        while let Some(line) = output.next().await {
            sink(line?.trim_end_matches(['\r', '\n']));
        }
        child.wait().await
    };

    let status = tokio::select! {
        status = run => status?,
        _ = token.cancelled() => return Err(LaunchError::Interrupted),
    };

    if status.success() {
        info!("command finished successfully");
        return Ok(());
    }

    Err(LaunchError::TrainingFailed {
        code: exit_code(status),
        command: cmd.to_string(),
    })
}

/// Splits `reader` on newlines, replacing invalid utf-8 instead of failing on it.
fn lines<R>(reader: R) -> impl Stream<Item = io::Result<String>>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(String::from_utf8_lossy(&buf).into_owned()), reader)),
            Err(e) => Some((Err(e), reader)),
        }
    })
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Counts local processes whose command line contains a pattern.
#[allow(unused)]
#[trait_variant::make(ProcessProbe: Send)]
pub trait ProcessProbeTemplate {
    /// Should return how many processes, other than the launcher, match `pattern`.
    ///
    /// # Arguments
    /// * `pattern` - A substring of the command line to look for.
    async fn count(&self, pattern: &str) -> io::Result<usize>;
}

/// Asks `ps` for the process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsProbe;

impl ProcessProbe for PsProbe {
    async fn count(&self, pattern: &str) -> io::Result<usize> {
        let out = Command::new("ps")
            .args(["-eo", "pid=,args="])
            .stdin(Stdio::null())
            .output()
            .await?;

        if !out.status.success() {
            return Err(io::Error::other(format!("ps exited with {}", out.status)));
        }

        let table = String::from_utf8_lossy(&out.stdout);
        Ok(count_matches(&table, pattern, std::process::id()))
    }
}

/// Counts the `pid args` rows of `table` matching `pattern`, skipping `own_pid`.
pub fn count_matches(table: &str, pattern: &str, own_pid: u32) -> usize {
    table
        .lines()
        .filter_map(|row| {
            let (pid, args) = row.trim_start().split_once(char::is_whitespace)?;
            let pid: u32 = pid.parse().ok()?;
            (pid != own_pid && args.contains(pattern)).then_some(())
        })
        .count()
}

/// Timing of the worker side watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Sleep before every look at the process table.
    pub poll_interval: Duration,
    /// Sleep between seeing training end and returning.
    pub grace: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace: DEFAULT_GRACE,
        }
    }
}

/// Waits on a worker node for the training process spawned by the master's `mpirun`.
///
/// Nothing is spawned here. The process table is checked once per
/// `poll_interval`: the process must be there at the first check, and once
/// it's gone the watcher returns after `grace`.
///
/// # Errors
/// `TrainingNeverStarted` if the first check finds nothing, `Interrupted`
/// if `token` is cancelled, `Io` if the probe fails.
pub async fn watch_worker<P>(
    probe: &P,
    pattern: &str,
    host: &str,
    config: &WatchConfig,
    token: &CancellationToken,
) -> Result<()>
where
    P: ProcessProbe,
{
    info!(host = host, pattern = pattern; "watching for training processes");
    let mut started = false;

    loop {
        sleep(config.poll_interval, token).await?;

        let count = probe.count(pattern).await?;
        let running = count > 0;

        if started {
            info!("training processes running: {count}");
            if !running {
                info!("worker {host} training completed");
                sleep(config.grace, token).await?;
                return Ok(());
            }
        } else if running {
            info!("training started on {host}: {count} process(es)");
            started = true;
        } else {
            warn!(
                "worker {host} exiting: training not started in {}s",
                config.poll_interval.as_secs()
            );
            return Err(LaunchError::TrainingNeverStarted {
                host: host.to_string(),
            });
        }
    }
}

async fn sleep(duration: Duration, token: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(LaunchError::Interrupted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "    1 /sbin/init
  42 /usr/sbin/sshd -D
 100 python train.py --epochs 3
 101 /bin/sh -c python train.py
 200 hvd_launcher --train-script train.py
 300 python train_other.py
";

    #[test]
    fn counts_matching_rows() {
        assert_eq!(count_matches(TABLE, "python train.py", 200), 2);
    }

    #[test]
    fn skips_own_pid() {
        assert_eq!(count_matches(TABLE, "python train.py", 100), 1);
    }

    #[test]
    fn ignores_malformed_rows() {
        assert_eq!(count_matches("garbage\n\nPID COMMAND\n", "COMMAND", 1), 0);
    }

    #[test]
    fn default_watch_timing() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.grace, Duration::from_secs(5));
    }
}
