use nix::sys::signal::Signal;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use super::{Profiler, ProfilerContext, TargetPids, child_group, fan_out};
use crate::api::PROFILING_PREFIX;
use crate::exec::{CommandOutput, CommandSpec};
use crate::job::ProfilingJob;
use crate::{AgentError, AgentResult};

const TOOL: &str = "cargo-flamegraph";
const FLUSH_POLL: Duration = Duration::from_millis(500);

/// Runs the native `flamegraph` recorder until the interval elapses, then
/// interrupts its process group with SIGTERM.
pub struct CargoFlameProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
}

impl CargoFlameProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
        }
    }

    /// Private working directory of one recording; the recorder leaves its
    /// `perf.data` there.
    pub fn work_dir(&self, job: &ProfilingJob, pid: &str) -> PathBuf {
        self.ctx
            .tmp_dir()
            .join(format!("{PROFILING_PREFIX}{}-{pid}-{}.work", job.output_type, job.iteration))
    }

    pub fn command(&self, pid: &str, file: &Path, work_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.ctx.config.cargo_flamegraph_path)
            .args(["-p", pid, "-o"])
            .arg(file.to_string_lossy())
            .arg("--root")
            .args(["--palette", "rust", "--title"])
            .arg(format!("Flamegraph for PID {pid}"))
            .env("LC_ALL", "C")
            .current_dir(work_dir)
            .process_group()
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let file = self
            .ctx
            .result_file(job.tool, job.output_type, pid, job.iteration);
        let work_dir = self.work_dir(job, pid);
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;

        let waited = self.record(job, pid, &file, &work_dir);
        if let Err(err) = std::fs::remove_dir_all(&work_dir) {
            tracing::warn!("could not remove {}: {err}", work_dir.display());
        }
        let out = waited?;

        let deadline = Instant::now() + self.ctx.config.flamegraph_flush_wait();
        while !file.exists() && Instant::now() < deadline {
            std::thread::sleep(FLUSH_POLL.min(self.ctx.config.flamegraph_flush_wait()));
        }
        if !file.exists() {
            return Err(AgentError::ProfilerFailure {
                tool: TOOL.to_string(),
                code: out.code,
                stderr: format!(
                    "output file not found: {}: {}",
                    file.display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            });
        }
        self.ctx.publish(job, &file)?;
        Ok(())
    }

    /// Runs the recorder until it exits or the interval timer interrupts it.
    fn record(
        &self,
        job: &ProfilingJob,
        pid: &str,
        file: &Path,
        work_dir: &Path,
    ) -> AgentResult<CommandOutput> {
        let mut child = self.ctx.executor.spawn(&self.command(pid, file, work_dir))?;
        let pgid = child_group(TOOL, child.as_ref())?;
        self.ctx.children.insert(pgid);

        let interrupted = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let timer = {
            let executor = self.ctx.executor.clone();
            let interrupted = interrupted.clone();
            let interval = job.interval;
            std::thread::spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(interval) {
                    tracing::debug!("sending SIGTERM to flamegraph group {pgid} after {interval:?}");
                    interrupted.store(true, Ordering::SeqCst);
                    if let Err(err) = executor.kill(-pgid, Signal::SIGTERM as i32) {
                        tracing::warn!("could not interrupt flamegraph group {pgid}: {err}");
                    }
                }
            })
        };

        let waited = child.wait();
        drop(done_tx);
        if timer.join().is_err() {
            tracing::warn!("flamegraph timer for pid {pid} panicked");
        }
        self.ctx.children.remove(pgid);

        let out = waited?;
        if !out.success() && !(interrupted.load(Ordering::SeqCst) && stopped_by_sigterm(&out)) {
            return Err(AgentError::profiler_failure(TOOL, out.code, &out.stderr));
        }
        Ok(out)
    }
}

fn stopped_by_sigterm(out: &CommandOutput) -> bool {
    let sigterm = Signal::SIGTERM as i32;
    out.signal == Some(sigterm) || out.code == Some(128 + sigterm)
}

impl Profiler for CargoFlameProfiler {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        self.ctx.purge_residue()?;
        self.pids.set(self.ctx.discovery().candidate_pids(job)?);
        Ok(())
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        let pids = self.pids.require()?;
        fan_out(&pids, self.ctx.config.submission_delay(), |pid| {
            self.profile_pid(job, pid)
        })
    }

    fn clean_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        self.ctx.terminate_running();
        self.ctx.purge_residue()?;
        Ok(())
    }
}
