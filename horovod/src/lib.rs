//! Horovod-style all-reduce launcher.
//!
//! Every node starts sshd. The master waits until every peer's sshd
//! accepts connections, then runs one `mpirun` spanning the whole cluster
//! and mirrors its output. Workers spawn nothing: they watch their process
//! table for the ranks `mpirun` started over ssh and exit when those are gone.

use cluster::{
    LaunchCommand, LaunchConfig, ProcessProbe, PsProbe, Result, TrainingWorld,
    command::host_spec,
    ssh,
    supervisor::{self, watch_worker},
};
use log::info;
use tokio_util::sync::CancellationToken;

/// Runs this node's part of the job.
///
/// # Errors
/// Whatever the ssh gate or the node's supervisor fails with.
pub async fn launch(
    world: &TrainingWorld,
    config: &LaunchConfig,
    token: &CancellationToken,
) -> Result<()> {
    let _sshd = ssh::start_daemon(&config.sshd_path)?;

    if world.is_master() {
        config.ssh.wait(world.peers(), token).await?;
        run_master(world, config, token).await
    } else {
        run_worker(world, config, &PsProbe, token).await
    }
}

/// Builds the master's `mpirun` command.
///
/// # Errors
/// `MissingEnv` if the network interface name wasn't provided.
pub fn master_command(world: &TrainingWorld, config: &LaunchConfig) -> Result<LaunchCommand> {
    let if_name = world.require_network_interface()?;
    let hosts = host_spec(world, config.args.local);
    Ok(LaunchCommand::horovod(
        world,
        &hosts,
        if_name,
        config.train_script(),
    ))
}

/// Drives the job from the master node until `mpirun` exits.
pub async fn run_master(
    world: &TrainingWorld,
    config: &LaunchConfig,
    token: &CancellationToken,
) -> Result<()> {
    info!("master node is {}", world.current_host());
    let cmd = master_command(world, config)?;
    supervisor::run_master(&cmd, token).await
}

/// Waits on a worker node until the training ranks come and go.
pub async fn run_worker<P: ProcessProbe>(
    world: &TrainingWorld,
    config: &LaunchConfig,
    probe: &P,
    token: &CancellationToken,
) -> Result<()> {
    let host = world.current_host();
    info!("worker: {host}, master: {}", world.master_host());

    let pattern = config.train_script().search_pattern();
    watch_worker(probe, &pattern, host, &config.watch, token).await?;

    info!("worker {host} has completed");
    Ok(())
}
