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
    let args = LauncherArgs::parse(env::args().skip(1), None)?;
    info!("starting training: {args:?}");

    let world = TrainingWorld::from_env()?;
    info!("training world: {world}");

    let config = LaunchConfig::new(args);
    horovod::launch(&world, &config, token).await
}
