use std::time::Duration;

use super::{
    Profiler, ProfilerContext, TargetPids, check_raw_size, fan_out, tolerate_insufficient_samples,
};
use crate::exec::CommandSpec;
use crate::job::ProfilingJob;
use crate::{AgentResult, whole_secs};

/// Records Ruby flamegraphs with rbspy.
pub struct RubyProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
}

impl RubyProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
        }
    }

    pub fn record_command(&self, job: &ProfilingJob, pid: &str, file: &std::path::Path) -> CommandSpec {
        CommandSpec::new(&self.ctx.config.rbspy_path)
            .args(["record", "--pid", pid, "--file"])
            .arg(file.to_string_lossy())
            .arg("--duration")
            .arg(whole_secs(job.interval).to_string())
            .args(["--format", "flamegraph"])
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let file = self
            .ctx
            .result_file(job.tool, job.output_type, pid, job.iteration);
        self.ctx
            .run_tracked("rbspy", &self.record_command(job, pid, &file))?;
        check_raw_size(&file, self.ctx.config.min_raw_size_bytes)?;
        self.ctx.publish(job, &file)?;
        Ok(())
    }
}

impl Profiler for RubyProfiler {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::profiler::test_support::Harness;

    fn write_file(spec: &CommandSpec, body: &str) -> CommandOutput {
        let at = spec.args.iter().position(|a| a == "--file").expect("--file");
        std::fs::write(&spec.args[at + 1], body).expect("write flamegraph");
        CommandOutput::ok(Vec::new())
    }

    #[test]
    fn records_flamegraph_per_pid() {
        let h = Harness::new("rbspy-record");
        h.exec.on("rbspy record", |spec| {
            write_file(spec, &format!("<svg>{}</svg>", "frame ".repeat(20)))
        });
        let p = RubyProfiler::new(h.ctx.clone());
        let job = h.job("ruby", "rbspy", "flamegraph", &[("pid", "55"), ("compressor", "gzip")]);
        p.set_up(&job).expect("set up");
        p.invoke(&job).expect("invoke");

        let line = h.exec.command_lines().pop().expect("command");
        assert!(line.ends_with(&format!(
            "rbspy record --pid 55 --file {} --duration 1 --format flamegraph",
            h.tmp().join("agent-flamegraph-55-0.svg").display()
        )));
        let files = h.result_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("agent-flamegraph-55-0.svg.gz"));
    }

    #[test]
    fn tiny_output_counts_as_no_samples() {
        let h = Harness::new("rbspy-tiny");
        h.exec.on("rbspy record", |spec| write_file(spec, "<svg/>"));
        let p = RubyProfiler::new(h.ctx.clone());
        let job = h.job("ruby", "rbspy", "flamegraph", &[("pid", "55")]);
        p.set_up(&job).expect("set up");
        p.invoke(&job).expect("tolerated");
        assert!(h.result_files().is_empty());
    }
}
