//! Test doubles shared by unit and integration tests.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::api::Event;
use crate::exec::{ChildHandle, CommandOutput, CommandSpec, Executor};
use crate::AgentResult;

/// In-memory writer for capturing protocol lines.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn text(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn events(&self) -> Vec<Event> {
        self.text()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| Event::parse(l).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

type Responder = Arc<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

struct Rule {
    needle: String,
    responder: Responder,
    until_killed: bool,
}

#[derive(Default)]
struct KillLog {
    sent: Mutex<Vec<(i32, i32)>>,
    cond: Condvar,
}

/// Executor that answers commands from a script instead of launching them.
///
/// Rules match when their needle is a substring of the command line; the
/// most recently registered match wins. Unmatched commands succeed with empty output.
/// When a command redirects stdout to a file, the canned stdout is written
/// there.
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    kills: Arc<KillLog>,
    next_pid: AtomicU32,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            kills: Arc::new(KillLog::default()),
            next_pid: AtomicU32::new(40_000),
        }
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, needle: &str, responder: F) -> &Self
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        self.push_rule(needle, Arc::new(responder), false)
    }

    pub fn on_stdout(&self, needle: &str, stdout: &str) -> &Self {
        let stdout = stdout.to_string();
        self.on(needle, move |_| CommandOutput::ok(stdout.clone()))
    }

    /// Spawned children matching `needle` block in `wait` until a kill
    /// reaches them, then report the responder's output.
    pub fn on_until_killed<F>(&self, needle: &str, responder: F) -> &Self
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        self.push_rule(needle, Arc::new(responder), true)
    }

    fn push_rule(&self, needle: &str, responder: Responder, until_killed: bool) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Rule {
                needle: needle.to_string(),
                responder,
                until_killed,
            });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    pub fn kills(&self) -> Vec<(i32, i32)> {
        self.kills
            .sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn find(&self, spec: &CommandSpec) -> Option<(Responder, bool)> {
        let line = spec.command_line();
        self.rules
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .rev()
            .find(|r| line.contains(&r.needle))
            .map(|r| (r.responder.clone(), r.until_killed))
    }

    fn record(&self, spec: &CommandSpec) {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(spec.clone());
    }
}

fn respond(responder: Option<&Responder>, spec: &CommandSpec) -> AgentResult<CommandOutput> {
    let mut out = match responder {
        Some(r) => r(spec),
        None => CommandOutput::ok(Vec::new()),
    };
    if let Some(path) = &spec.stdout {
        std::fs::write(path, &out.stdout)?;
        out.stdout.clear();
    }
    Ok(out)
}

impl Executor for ScriptedExecutor {
    fn run(&self, spec: &CommandSpec) -> AgentResult<CommandOutput> {
        self.record(spec);
        let rule = self.find(spec);
        respond(rule.as_ref().map(|(r, _)| r), spec)
    }

    fn spawn(&self, spec: &CommandSpec) -> AgentResult<Box<dyn ChildHandle>> {
        self.record(spec);
        let (responder, until_killed) = match self.find(spec) {
            Some((r, k)) => (Some(r), k),
            None => (None, false),
        };
        Ok(Box::new(ScriptedChild {
            id: self.next_pid.fetch_add(1, Ordering::Relaxed),
            spec: spec.clone(),
            responder,
            until_killed,
            kills: self.kills.clone(),
        }))
    }

    fn kill(&self, pid: i32, signal: i32) -> AgentResult<()> {
        self.kills
            .sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((pid, signal));
        self.kills.cond.notify_all();
        Ok(())
    }
}

struct ScriptedChild {
    id: u32,
    spec: CommandSpec,
    responder: Option<Responder>,
    until_killed: bool,
    kills: Arc<KillLog>,
}

impl ChildHandle for ScriptedChild {
    fn id(&self) -> u32 {
        self.id
    }

    fn wait(&mut self) -> AgentResult<CommandOutput> {
        if self.until_killed {
            let me = i32::try_from(self.id).unwrap_or(i32::MAX);
            let sent = self.kills.sent.lock().unwrap_or_else(|p| p.into_inner());
            let (_sent, timeout) = self
                .kills
                .cond
                .wait_timeout_while(sent, Duration::from_secs(30), |sent| {
                    !sent.iter().any(|(pid, _)| pid.abs() == me)
                })
                .unwrap_or_else(|p| p.into_inner());
            if timeout.timed_out() {
                return Err(std::io::Error::other("scripted child was never killed").into());
            }
        }
        respond(self.responder.as_ref(), &self.spec)
    }
}
