use std::{fmt, process::Stdio};

use tokio::process::Command;

use crate::{hosts, world::TrainingWorld};

/// Binary used by the horovod path.
pub const MPIRUN: &str = "mpirun";

/// A command line kept as argument tokens, first token being the program.
///
/// It is never run through a shell: `to_command` hands the tokens to the OS
/// as an argv, `Display` only exists for logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Appends a single token.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several tokens in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends an `-mca <key> <value>` pair.
    pub fn mca(self, key: &str, value: impl Into<String>) -> Self {
        self.arg("-mca").arg(key).arg(value)
    }

    /// Appends an open mpi `-x` export, either `NAME=VALUE` or a bare `NAME`.
    pub fn export(self, var: impl Into<String>) -> Self {
        self.arg("-x").arg(var)
    }

    /// Sets a variable in the spawned process' environment, on top of the inherited one.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The program followed by its arguments.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Builds the process to spawn, with piped output and a null stdin.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// The `mpirun` line for a horovod job.
    ///
    /// # Arguments
    /// * `world` - The cluster topology, gives `-np`.
    /// * `host_spec` - The `-H` value.
    /// * `if_name` - Network interface used by the tcp transports and nccl.
    /// * `script` - The training invocation appended after the mpi flags.
    pub fn horovod(
        world: &TrainingWorld,
        host_spec: &str,
        if_name: &str,
        script: TrainScript,
    ) -> Self {
        Self::new(MPIRUN)
            .arg("-np")
            .arg(world.total_size().to_string())
            .arg("-H")
            .arg(host_spec)
            .args(["--allow-run-as-root", "--display-map", "--tag-output"])
            .mca("btl_tcp_if_include", if_name)
            .mca("oob_tcp_if_include", if_name)
            .export(format!("NCCL_SOCKET_IFNAME={if_name}"))
            .mca("plm_rsh_no_tree_spawn", "1")
            .args(["--bind-to", "none", "--map-by", "slot"])
            .mca("orte_abort_on_non_zero_status", "1")
            .export("NCCL_DEBUG=INFO")
            .export("LD_LIBRARY_PATH")
            .export("PATH")
            .mca("pml", "ob1")
            .mca("btl", "^openib")
            .args(script.into_tokens())
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in self.tokens() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;

            if needs_quotes(token) {
                write!(f, "'{}'", token.replace('\'', r"'\''"))?;
            } else {
                f.write_str(token)?;
            }
        }
        Ok(())
    }
}

fn needs_quotes(token: &str) -> bool {
    token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || "'\"$`\\|&;<>()*?![]{}#~".contains(c))
}

/// The user's training invocation: interpreter, script, forwarded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainScript {
    pub python: String,
    pub script: String,
    pub args: Vec<String>,
}

impl TrainScript {
    pub fn new(python: impl Into<String>, script: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            args,
        }
    }

    /// What a worker looks for in the process table: `<python> <script>`.
    pub fn search_pattern(&self) -> String {
        format!("{} {}", self.python, self.script)
    }

    pub fn into_tokens(self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.args.len() + 2);
        tokens.push(self.python);
        tokens.push(self.script);
        tokens.extend(self.args);
        tokens
    }

    pub fn to_command(&self) -> LaunchCommand {
        LaunchCommand::new(&self.python)
            .arg(&self.script)
            .args(self.args.iter().cloned())
    }
}

/// Picks the `-H` value for the job.
pub fn host_spec(world: &TrainingWorld, local: bool) -> String {
    if local {
        hosts::local_host_string(world.processes_per_node())
    } else {
        hosts::host_string(world.hosts(), world.processes_per_node())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> TrainingWorld {
        TrainingWorld::new(
            vec!["algo-2".into(), "algo-1".into()],
            "algo-1".into(),
            4,
            Some("eth0".into()),
        )
        .unwrap()
    }

    fn script() -> TrainScript {
        TrainScript::new("python", "train.py", vec!["--epochs".into(), "3".into()])
    }

    #[test]
    fn horovod_command_starts_with_mpirun_and_ends_with_script() {
        let world = world();
        let cmd = LaunchCommand::horovod(&world, &host_spec(&world, false), "eth0", script());

        assert_eq!(cmd.program(), "mpirun");
        let args = cmd.get_args();
        assert_eq!(&args[..4], ["-np", "8", "-H", "algo-2:4,algo-1:4"]);
        assert_eq!(&args[args.len() - 4..], ["python", "train.py", "--epochs", "3"]);
    }

    #[test]
    fn horovod_command_has_interface_flags_in_order() {
        let world = world();
        let cmd = LaunchCommand::horovod(&world, "localhost:4", "ens5", script());
        let line = cmd.to_string();

        let expected = "mpirun -np 8 -H localhost:4 --allow-run-as-root --display-map --tag-output \
            -mca btl_tcp_if_include ens5 -mca oob_tcp_if_include ens5 -x NCCL_SOCKET_IFNAME=ens5 \
            -mca plm_rsh_no_tree_spawn 1 --bind-to none --map-by slot \
            -mca orte_abort_on_non_zero_status 1 -x NCCL_DEBUG=INFO -x LD_LIBRARY_PATH -x PATH \
            -mca pml ob1 -mca btl ^openib python train.py --epochs 3";
        assert_eq!(line, expected);
    }

    #[test]
    fn local_host_spec_ignores_cluster() {
        assert_eq!(host_spec(&world(), true), "localhost:4");
    }

    #[test]
    fn display_quotes_shell_sensitive_tokens() {
        let cmd = LaunchCommand::new("python").args(["a b", "it's", "", "plain"]);
        assert_eq!(cmd.to_string(), r#"python 'a b' 'it'\''s' '' plain"#);
    }

    #[test]
    fn envs_stay_out_of_the_rendered_line() {
        let cmd = LaunchCommand::new("python").arg("t.py").env("DMLC_ROLE", "scheduler");
        assert_eq!(cmd.to_string(), "python t.py");
        assert_eq!(cmd.get_envs(), [("DMLC_ROLE".to_string(), "scheduler".to_string())]);
    }

    #[test]
    fn search_pattern_is_interpreter_and_script() {
        assert_eq!(script().search_pattern(), "python train.py");
        assert_eq!(script().to_command().to_string(), "python train.py --epochs 3");
    }
}
