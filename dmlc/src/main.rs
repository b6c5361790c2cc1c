use std::{env, process::ExitCode};

use cluster::{LaunchConfig, LauncherArgs, Result, TrainingWorld, error, logging, shutdown};
use log::info;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let token = shutdown::interrupt_token();
    error::report(run(&token).await)
}

async fn run(token: &CancellationToken) -> Result<()> {
    let args =
        LauncherArgs::parse_script_only(env::args().skip(1), Some(dmlc::DEFAULT_TRAIN_SCRIPT))?;
    info!("starting training: {args:?}");

    let world = TrainingWorld::from_env()?;
    info!("training world: {world}");

    let config = LaunchConfig::new(args);
    info!("mpi run execution command: {}", config.train_script().to_command());

    dmlc::launch(&world, &config, token).await
}
