use std::path::PathBuf;
use std::time::Duration;

use super::{
    Profiler, ProfilerContext, TargetPids, check_raw_size, fan_out, tag_stacks_with_pid,
    tolerate_insufficient_samples,
};
use crate::api::OutputType;
use crate::exec::CommandSpec;
use crate::job::ProfilingJob;
use crate::{AgentResult, whole_secs};

/// Which kernel tracing toolchain produces the folded stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpfVariant {
    /// BCC `profile` tool.
    Bcc,
    /// libbpf CO-RE `profile` tool relying on kernel BTF.
    Libbpf,
}

impl BpfVariant {
    fn name(self) -> &'static str {
        match self {
            Self::Bcc => "bpf",
            Self::Libbpf => "btf",
        }
    }
}

pub struct BpfProfiler {
    ctx: ProfilerContext,
    variant: BpfVariant,
    pids: TargetPids,
}

impl BpfProfiler {
    pub fn new(ctx: ProfilerContext, variant: BpfVariant) -> Self {
        Self {
            ctx,
            variant,
            pids: TargetPids::default(),
        }
    }

    pub fn command(&self, job: &ProfilingJob, pid: &str) -> CommandSpec {
        let secs = whole_secs(job.interval).to_string();
        match self.variant {
            BpfVariant::Bcc => CommandSpec::new(&self.ctx.config.bcc_profiler_path)
                .args(["-df", "-U", "-F", "99", "-p", pid])
                .arg(secs),
            BpfVariant::Libbpf => CommandSpec::new(&self.ctx.config.libbpf_profiler_path)
                .args(["-f", "-U", "-F", "99", "-p", pid])
                .arg(secs),
        }
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let out = self.ctx.run_tracked(self.variant.name(), &self.command(job, pid))?;
        let raw = self
            .ctx
            .result_file(job.tool, OutputType::Raw, pid, job.iteration);
        tag_stacks_with_pid(&out.stdout, pid, &raw)?;

        let artifact: PathBuf = if job.output_type == OutputType::Flamegraph {
            check_raw_size(&raw, self.ctx.config.min_raw_size_bytes)?;
            let svg = self
                .ctx
                .result_file(job.tool, job.output_type, pid, job.iteration);
            self.ctx.renderer(job)?.stack_samples(&raw, &svg)?;
            svg
        } else {
            raw
        };
        self.ctx.publish(job, &artifact)?;
        Ok(())
    }
}

impl Profiler for BpfProfiler {
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
