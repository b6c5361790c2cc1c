pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod mpi;
pub mod shutdown;
pub mod ssh;
pub mod supervisor;
pub mod world;

pub use cli::LauncherArgs;
pub use command::{LaunchCommand, TrainScript};
pub use config::LaunchConfig;
pub use error::{LaunchError, Result};
pub use mpi::MpiFlavor;
pub use ssh::SshGate;
pub use supervisor::{ProcessProbe, PsProbe, WatchConfig};
pub use world::TrainingWorld;
