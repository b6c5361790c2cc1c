use std::{error::Error, fmt, io, process::ExitCode, time::Duration};

/// The launcher's result type.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Exit code used for every launcher failure that isn't a training failure.
pub const LAUNCHER_FAILURE_EXIT: i32 = 2;

/// Exit code reported by a worker that never saw the training process.
pub const NOT_STARTED_EXIT: i32 = 1;

/// All errors that can occur while launching or supervising a training job.
#[derive(Debug)]
pub enum LaunchError {
    /// A required environment variable is not set.
    MissingEnv(&'static str),
    /// An environment variable is set but can't be used.
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    /// The command line couldn't be understood.
    InvalidArgs(String),
    /// Some hosts never accepted ssh connections before the deadline.
    SshTimeout {
        pending: Vec<String>,
        timeout: Duration,
    },
    /// `mpirun --version` matched neither Open MPI nor MPICH.
    UnsupportedMpi(String),
    /// The training command exited with a non-zero status.
    TrainingFailed { code: i32, command: String },
    /// The worker never observed the training process.
    TrainingNeverStarted { host: String },
    /// The launcher received an interrupt signal.
    Interrupted,
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl LaunchError {
    /// The process exit code this error maps to.
    ///
    /// An interrupt exits with 0, the same as a successful run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TrainingFailed { code, .. } => *code,
            Self::TrainingNeverStarted { .. } => NOT_STARTED_EXIT,
            Self::Interrupted => 0,
            _ => LAUNCHER_FAILURE_EXIT,
        }
    }
}

/// Logs the outcome of a launch and turns it into the process exit code.
pub fn report(result: Result<()>) -> ExitCode {
    ExitCode::from(status_byte(result))
}

fn status_byte(result: Result<()>) -> u8 {
    let code = match result {
        Ok(()) => 0,
        Err(LaunchError::Interrupted) => {
            log::info!("stop launcher");
            0
        }
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    };

    // Exit statuses are a byte wide on every platform we run on.
    u8::try_from(code).unwrap_or(1)
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(name) => write!(f, "missing environment variable {name}"),
            Self::InvalidEnv {
                name,
                value,
                reason,
            } => write!(f, "invalid value for {name} ({value:?}): {reason}"),
            Self::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            Self::SshTimeout { pending, timeout } => write!(
                f,
                "timed out after {}s waiting for sshd on {}",
                timeout.as_secs_f64(),
                pending.join(", ")
            ),
            Self::UnsupportedMpi(out) => write!(f, "unknown MPI version: {}", out.trim()),
            Self::TrainingFailed { code, command } => {
                write!(f, "command `{command}` exited with status {code}")
            }
            Self::TrainingNeverStarted { host } => {
                write!(f, "worker {host}: training not started in time")
            }
            Self::Interrupted => write!(f, "interrupted"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LaunchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LaunchError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
