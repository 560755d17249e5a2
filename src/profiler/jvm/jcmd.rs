use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::link_tmp_to_target;
use crate::api::OutputType;
use crate::exec::CommandSpec;
use crate::job::ProfilingJob;
use crate::profiler::{Profiler, ProfilerContext, TargetPids, fan_out};
use crate::{AgentError, AgentResult, whole_secs};

const TOOL: &str = "jcmd";

const JFR_STOPPED: &str =
    "Jcmd remains stopped for unknown reason, please restart the pod to be profiled";

/// Where a flight recording stands according to `JFR.check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Running,
    Delayed,
    Stopped,
    Unknown,
}

impl RecordingState {
    pub fn from_check_output(out: &str) -> Self {
        if out.contains("running") {
            Self::Running
        } else if out.contains("delayed") {
            Self::Delayed
        } else if out.contains("stopped") {
            Self::Stopped
        } else {
            Self::Unknown
        }
    }
}

/// Drives the JVM diagnostic command: flight recordings, thread and heap
/// dumps, class histograms.
pub struct JcmdProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
    recordings: Mutex<BTreeSet<String>>,
    stopping: Mutex<BTreeSet<String>>,
}

impl JcmdProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
            recordings: Mutex::new(BTreeSet::new()),
            stopping: Mutex::new(BTreeSet::new()),
        }
    }

    fn jcmd(&self, pid: &str) -> CommandSpec {
        CommandSpec::new(&self.ctx.config.jcmd_path).arg(pid)
    }

    fn settings_path(&self, job: &ProfilingJob) -> PathBuf {
        job.additional_argument("jfr-settings")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.ctx.config.staged_jfr_settings())
    }

    pub fn recording_name(job: &ProfilingJob, pid: &str) -> String {
        format!("pid_{pid}_{}", job.output_type)
    }

    pub fn command(&self, job: &ProfilingJob, pid: &str, file: &Path) -> CommandSpec {
        let jcmd = self.jcmd(pid);
        match job.output_type {
            OutputType::ThreadDump => jcmd.arg("Thread.print").stdout_to(file),
            OutputType::HeapDump => jcmd.arg("GC.heap_dump").arg(file.to_string_lossy()),
            OutputType::HeapHistogram => jcmd.arg("GC.class_histogram").stdout_to(file),
            _ => jcmd
                .arg("JFR.start")
                .arg(format!("duration={}s", whole_secs(job.interval)))
                .arg(format!("filename={}", file.to_string_lossy()))
                .arg(format!("name={}", Self::recording_name(job, pid)))
                .arg(format!("settings={}", self.settings_path(job).to_string_lossy())),
        }
    }

    fn is_stopping(&self, pid: &str) -> bool {
        self.stopping
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(pid)
    }

    /// Polls `JFR.check` until the recording leaves the running/delayed states.
    /// A stopped recording is reported but whatever it wrote is still published.
    fn watch_recording(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let check = self
            .jcmd(pid)
            .arg("JFR.check")
            .arg(format!("name={}", Self::recording_name(job, pid)))
            .quiet();
        loop {
            std::thread::sleep(self.ctx.config.jfr_poll_interval());
            if self.is_stopping(pid) {
                return Ok(());
            }
            let out = self.ctx.executor.run(&check)?;
            match RecordingState::from_check_output(&out.stdout_text()) {
                RecordingState::Running | RecordingState::Delayed => continue,
                RecordingState::Stopped => {
                    tracing::error!("{JFR_STOPPED} (PID: {pid})");
                    return Ok(());
                }
                RecordingState::Unknown => return Ok(()),
            }
        }
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let file = self
            .ctx
            .result_file(job.tool, job.output_type, pid, job.iteration);
        let spec = self.command(job, pid, &file);
        let out = self.ctx.run_tool(TOOL, &spec)?;
        if job.output_type == OutputType::Jfr {
            self.recordings
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(pid.to_string());
            tracing::debug!("{}", out.stdout_text().trim());
            self.watch_recording(job, pid)?;
        }
        self.ctx.publish(job, &file)?;
        Ok(())
    }
}

impl Profiler for JcmdProfiler {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        link_tmp_to_target(&self.ctx, job)?;
        self.pids.set(self.ctx.discovery().candidate_pids(job)?);
        if job.output_type == OutputType::Jfr && job.additional_argument("jfr-settings").is_none() {
            let src = &self.ctx.config.jfr_settings_path;
            std::fs::copy(src, self.ctx.config.staged_jfr_settings()).map_err(|e| {
                AgentError::MissingInput(format!("jfr settings {}: {e}", src.display()))
            })?;
        }
        Ok(())
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        let pids = self.pids.require()?;
        fan_out(&pids, self.ctx.config.submission_delay(), |pid| {
            self.profile_pid(job, pid)
        })
    }

    fn clean_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        let recorded: Vec<String> = self
            .recordings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        for pid in recorded {
            self.stopping
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(pid.clone());
            let stop = self
                .jcmd(&pid)
                .arg("JFR.stop")
                .arg(format!("name={}", Self::recording_name(job, &pid)));
            if let Err(err) = self.ctx.run_tool(TOOL, &stop) {
                tracing::warn!("could not stop recording on pid {pid}: {err}");
            }
        }
        self.ctx.purge_residue()?;
        Ok(())
    }
}
