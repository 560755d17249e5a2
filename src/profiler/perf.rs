use std::path::PathBuf;
use std::time::Duration;

use super::{
    Profiler, ProfilerContext, TargetPids, check_raw_size, fan_out, tolerate_insufficient_samples,
};
use crate::api::{Language, OutputType, PROFILING_PREFIX};
use crate::exec::CommandSpec;
use crate::flamegraph::{FlameGraphOptions, FlameGraphRenderer};
use crate::job::ProfilingJob;
use crate::{AgentResult, whole_secs};

const TOOL: &str = "perf";

/// `perf record` followed by `perf script`, stack collapsing and rendering.
pub struct PerfProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
}

struct PerfFiles {
    data: PathBuf,
    script: PathBuf,
    folded: PathBuf,
    svg: PathBuf,
}

impl PerfProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
        }
    }

    fn files(&self, job: &ProfilingJob, pid: &str) -> PerfFiles {
        let tmp = self.ctx.tmp_dir();
        let stem = format!("{PROFILING_PREFIX}perf-{pid}-{}", job.iteration);
        PerfFiles {
            data: tmp.join(format!("{stem}.data")),
            script: tmp.join(format!("{stem}.script")),
            folded: self
                .ctx
                .result_file(job.tool, OutputType::Raw, pid, job.iteration),
            svg: self
                .ctx
                .result_file(job.tool, job.output_type, pid, job.iteration),
        }
    }

    pub fn record_command(&self, job: &ProfilingJob, pid: &str, data: &std::path::Path) -> CommandSpec {
        CommandSpec::new(&self.ctx.config.perf_path)
            .args(["record", "-p", pid, "-o"])
            .arg(data.to_string_lossy())
            .args(["-g", "--", "sleep"])
            .arg(whole_secs(job.interval).to_string())
    }

    fn renderer(&self, job: &ProfilingJob) -> AgentResult<FlameGraphRenderer> {
        let mut options = FlameGraphOptions::for_job(&self.ctx.config.flamegraph_script_path, job)?;
        if job.additional_argument("flamegraph-colors").is_none() {
            options = options.with_colors(perf_palette(job.language));
        }
        Ok(FlameGraphRenderer::new(self.ctx.executor.clone(), options))
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let files = self.files(job, pid);
        self.ctx
            .run_tracked(TOOL, &self.record_command(job, pid, &files.data))?;

        let script = CommandSpec::new(&self.ctx.config.perf_path)
            .args(["script", "-i"])
            .arg(files.data.to_string_lossy())
            .stdout_to(&files.script);
        self.ctx.run_tracked(TOOL, &script)?;

        let collapse = CommandSpec::new(&self.ctx.config.stackcollapse_perf_path)
            .stdin_from(&files.script)
            .stdout_to(&files.folded);
        self.ctx.run_tracked("stackcollapse-perf", &collapse)?;

        check_raw_size(&files.folded, self.ctx.config.min_raw_size_bytes)?;
        self.renderer(job)?.stack_samples(&files.folded, &files.svg)?;
        self.ctx.publish(job, &files.svg)?;
        Ok(())
    }
}

fn perf_palette(language: Language) -> &'static str {
    match language {
        Language::Node => "js",
        Language::Java => "java",
        _ => "green",
    }
}

impl Profiler for PerfProfiler {
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

    const SCRIPT: &str = "app 300 1.0: cycles:\n\tffff main\n\tffff start\n\n";
    const FOLDED: &str = "app;start;main 1\napp;start;work 250\napp;start;idle 3\n";

    fn scripted(name: &str) -> Harness {
        let h = Harness::new(name);
        h.exec.on_stdout("perf script", SCRIPT);
        h.exec.on("stackcollapse-perf.pl", |spec| {
            let input = std::fs::read_to_string(spec.stdin.as_ref().expect("stdin")).expect("script");
            assert!(input.contains("cycles"));
            CommandOutput::ok(FOLDED)
        });
        h.exec.on_stdout("flamegraph.pl", "<svg/>");
        h
    }

    #[test]
    fn pipeline_records_collapses_and_renders() {
        let h = scripted("perf-pipeline");
        let p = PerfProfiler::new(h.ctx.clone());
        let job = h.job("clang", "perf", "flamegraph", &[("pid", "300")]);
        p.set_up(&job).expect("set up");
        p.invoke(&job).expect("invoke");

        let lines = h.exec.command_lines();
        let data = h.tmp().join("agent-perf-300-0.data");
        assert_eq!(
            lines[0],
            format!("/app/perf record -p 300 -o {} -g -- sleep 1", data.display())
        );
        assert_eq!(lines[1], format!("/app/perf script -i {}", data.display()));
        assert!(lines[3].contains("--colors green"));
        assert_eq!(
            std::fs::read_to_string(h.tmp().join("agent-raw-300-0.txt")).expect("folded"),
            FOLDED
        );
        assert!(h.result_files()[0].ends_with("agent-flamegraph-300-0.svg"));
    }

    #[test]
    fn explicit_colors_beat_the_perf_palette() {
        let h = scripted("perf-colors");
        let p = PerfProfiler::new(h.ctx.clone());
        let job = h.job("node", "perf", "flamegraph", &[("pid", "300"), ("flamegraph-colors", "aqua")]);
        p.set_up(&job).expect("set up");
        p.invoke(&job).expect("invoke");
        let render = h.exec.command_lines().pop().expect("render");
        assert!(render.contains("--colors aqua"));
        assert!(!render.contains("--colors js"));
    }

    #[test]
    fn palette_follows_language() {
        assert_eq!(perf_palette(Language::Java), "java");
        assert_eq!(perf_palette(Language::Node), "js");
        assert_eq!(perf_palette(Language::Rust), "green");
    }
}
