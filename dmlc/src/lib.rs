//! MPI launcher for DMLC parameter-server jobs.
//!
//! The tracker binds the scheduler's address and runs the scheduler locally.
//! `mpirun` then starts one group of workers and one group of servers over the
//! hostfile, each told its role through `DMLC_ROLE`.

pub mod opts;
pub mod submit;
pub mod tracker;

use cluster::{LaunchConfig, MpiFlavor, Result, TrainingWorld, supervisor};
use log::info;
use tokio_util::sync::CancellationToken;

pub use opts::DmlcOpts;
pub use submit::{Role, Submitter};
pub use tracker::Tracker;

/// Default training script of the parameter-server launcher.
pub const DEFAULT_TRAIN_SCRIPT: &str = "train_maskrcnn.py";

/// Runs the whole parameter-server job from this node.
///
/// # Errors
/// The first failure among the hostfile, mpi detection, the tracker, the
/// scheduler or either process group.
pub async fn launch(
    world: &TrainingWorld,
    config: &LaunchConfig,
    token: &CancellationToken,
) -> Result<()> {
    let opts = DmlcOpts::from_world(world, config)?;
    info!("mpi final args: {opts:?}");

    let flavor = MpiFlavor::probe().await?;
    info!("detected {flavor:?}");

    run(&opts, Submitter::new(flavor), world.current_host(), token).await
}

/// Starts the scheduler and both groups, then waits for all three.
pub async fn run(
    opts: &DmlcOpts,
    submitter: Submitter,
    host: &str,
    token: &CancellationToken,
) -> Result<()> {
    let root_uri = tracker::resolve_root_uri(host).await;
    let tracker = Tracker::bind(&root_uri, opts.num_workers, opts.num_servers)?;
    let envs = tracker.envs();

    let scheduler = tracker.scheduler_command(&opts.command);
    info!("start scheduler: {scheduler}");

    tokio::try_join!(
        supervisor::run_master(&scheduler, token),
        submitter.submit(opts, &envs, token),
    )?;
    Ok(())
}
