//! Launching external profilers and helper tools.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use std::fs::File;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::AgentResult;

/// Everything needed to start one external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// File fed to the child's stdin.
    pub stdin: Option<PathBuf>,
    /// File receiving the child's stdout instead of the capture buffer.
    pub stdout: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Start the child as leader of a new process group.
    pub new_process_group: bool,
    /// Keep the command line out of debug logs.
    pub quiet: bool,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_from(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn current_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.cwd = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn process_group(mut self) -> Self {
        self.new_process_group = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Shell-like rendering used in logs and test assertions.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn to_command(&self) -> AgentResult<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(match &self.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        });
        cmd.stdout(match &self.stdout {
            Some(path) => Stdio::from(File::create(path)?),
            None => Stdio::piped(),
        });
        cmd.stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if self.new_process_group {
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was killed by a signal.
    pub code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            signal: Some(signal),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            stdout,
            stderr,
        }
    }
}

/// A started child that is waited on later.
pub trait ChildHandle: Send {
    fn id(&self) -> u32;
    fn wait(&mut self) -> AgentResult<CommandOutput>;
}

/// Process-launching seam; profilers only talk to the outside world through it.
pub trait Executor: Send + Sync {
    /// Spawns the command and waits for it to finish.
    fn run(&self, spec: &CommandSpec) -> AgentResult<CommandOutput>;

    fn spawn(&self, spec: &CommandSpec) -> AgentResult<Box<dyn ChildHandle>>;

    /// Sends `signal` to `pid`; a negative pid addresses a process group.
    fn kill(&self, pid: i32, signal: i32) -> AgentResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor {
    silent: bool,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self { silent: false }
    }

    /// An executor that never logs command lines.
    pub fn silent() -> Self {
        Self { silent: true }
    }

    fn trace(&self, spec: &CommandSpec) {
        if !self.silent && !spec.quiet {
            tracing::debug!("launching command: {}", spec.command_line());
        }
    }
}

impl Executor for SystemExecutor {
    fn run(&self, spec: &CommandSpec) -> AgentResult<CommandOutput> {
        self.trace(spec);
        let out = spec.to_command()?.output()?;
        Ok(CommandOutput::from_status(out.status, out.stdout, out.stderr))
    }

    fn spawn(&self, spec: &CommandSpec) -> AgentResult<Box<dyn ChildHandle>> {
        self.trace(spec);
        let child = spec.to_command()?.spawn()?;
        Ok(Box::new(SystemChild {
            id: child.id(),
            child: Some(child),
        }))
    }

    fn kill(&self, pid: i32, sig: i32) -> AgentResult<()> {
        let sig = Signal::try_from(sig).map_err(std::io::Error::from)?;
        signal::kill(Pid::from_raw(pid), sig).map_err(std::io::Error::from)?;
        Ok(())
    }
}

struct SystemChild {
    child: Option<Child>,
    id: u32,
}

impl ChildHandle for SystemChild {
    fn id(&self) -> u32 {
        self.id
    }

    fn wait(&mut self) -> AgentResult<CommandOutput> {
        let Some(child) = self.child.take() else {
            return Err(std::io::Error::other("child already waited on").into());
        };
        let out = child.wait_with_output()?;
        Ok(CommandOutput::from_status(out.status, out.stdout, out.stderr))
    }
}
