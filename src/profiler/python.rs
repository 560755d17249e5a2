use std::path::PathBuf;
use std::time::Duration;

use super::{
    Profiler, ProfilerContext, TargetPids, check_raw_size, fan_out, tolerate_insufficient_samples,
};
use crate::api::OutputType;
use crate::exec::CommandSpec;
use crate::job::ProfilingJob;
use crate::{AgentResult, whole_secs};

const TOOL: &str = "py-spy";

/// Samples CPython interpreters with py-spy.
///
/// Flamegraphs are recorded as raw folded stacks and rendered locally so the
/// job's flamegraph options apply; speedscope is written by py-spy itself.
pub struct PythonProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
}

impl PythonProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
        }
    }

    pub fn record_command(&self, job: &ProfilingJob, pid: &str, file: &std::path::Path, format: &str) -> CommandSpec {
        CommandSpec::new(&self.ctx.config.pyspy_path)
            .args(["record", "-p", pid, "-o"])
            .arg(file.to_string_lossy())
            .arg("-d")
            .arg(whole_secs(job.interval).to_string())
            .args(["-s", "-t", "-f", format])
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let file = self
            .ctx
            .result_file(job.tool, job.output_type, pid, job.iteration);
        let artifact: PathBuf = match job.output_type {
            OutputType::ThreadDump => {
                let dump = CommandSpec::new(&self.ctx.config.pyspy_path)
                    .args(["dump", "-p", pid])
                    .stdout_to(&file);
                self.ctx.run_tracked(TOOL, &dump)?;
                file
            }
            OutputType::Speedscope => {
                self.ctx
                    .run_tracked(TOOL, &self.record_command(job, pid, &file, "speedscope"))?;
                file
            }
            _ => {
                let raw = self
                    .ctx
                    .result_file(job.tool, OutputType::Raw, pid, job.iteration);
                self.ctx
                    .run_tracked(TOOL, &self.record_command(job, pid, &raw, "raw"))?;
                check_raw_size(&raw, self.ctx.config.min_raw_size_bytes)?;
                self.ctx.renderer(job)?.stack_samples(&raw, &file)?;
                file
            }
        };
        self.ctx.publish(job, &artifact)?;
        Ok(())
    }
}

impl Profiler for PythonProfiler {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        self.ctx.purge_residue()?;
        self.pids.set(self.ctx.discovery().candidate_pids(job)?);
        Ok(())
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        let pids = self.pids.require()?;
        fan_out(&pids, self.ctx.config.submission_delay(), |pid| {
            tolerate_insufficient_samples(pid, self.profile_pid(job, pid))
        })
    }

    fn clean_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        self.ctx.terminate_running();
        self.ctx.purge_residue()?;
        Ok(())
    }
}
