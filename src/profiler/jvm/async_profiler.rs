use std::path::PathBuf;
use std::time::Duration;

use super::link_tmp_to_target;
use crate::api::OutputType;
use crate::exec::CommandSpec;
use crate::job::ProfilingJob;
use crate::profiler::{Profiler, ProfilerContext, TargetPids, fan_out};
use crate::{AgentResult, fsutil, whole_secs};

const TOOL: &str = "async-profiler";

/// Attaches async-profiler to each JVM through its `profiler.sh` launcher.
pub struct AsyncProfiler {
    ctx: ProfilerContext,
    pids: TargetPids,
}

impl AsyncProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            pids: TargetPids::default(),
        }
    }

    fn launcher(&self) -> PathBuf {
        self.ctx.config.staged_async_profiler_dir().join("profiler.sh")
    }

    pub fn record_command(&self, job: &ProfilingJob, pid: &str, file: &std::path::Path) -> CommandSpec {
        // async-profiler has no `raw` output; collapsed stacks are the raw form.
        let output = match job.output_type {
            OutputType::Raw => OutputType::Collapsed,
            other => other,
        };
        CommandSpec::new(self.launcher())
            .args(["-o", output.as_str()])
            .args(["-d".to_string(), whole_secs(job.interval).to_string()])
            .arg("-f")
            .arg(file.to_string_lossy())
            .args(["-e", job.event.as_str()])
            .args(["--fdtransfer", pid])
    }

    fn profile_pid(&self, job: &ProfilingJob, pid: &str) -> AgentResult<()> {
        let file = self
            .ctx
            .result_file(job.tool, job.output_type, pid, job.iteration);
        self.ctx.run_tool(TOOL, &self.record_command(job, pid, &file))?;
        self.ctx.publish(job, &file)?;
        Ok(())
    }
}

impl Profiler for AsyncProfiler {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        link_tmp_to_target(&self.ctx, job)?;
        self.pids.set(self.ctx.discovery().candidate_pids(job)?);
        let staged = self.ctx.config.staged_async_profiler_dir();
        if staged.exists() {
            std::fs::remove_dir_all(&staged)?;
        }
        fsutil::copy_tree(&self.ctx.config.async_profiler_dir, &staged)
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        let pids = self.pids.require()?;
        fan_out(&pids, self.ctx.config.submission_delay(), |pid| {
            self.profile_pid(job, pid)
        })
    }

    fn clean_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        let launcher = self.launcher();
        if launcher.exists() {
            for pid in self.pids.get() {
                let stop = CommandSpec::new(&launcher).args(["stop", pid.as_str()]);
                if let Err(err) = self.ctx.run_tool(TOOL, &stop) {
                    tracing::warn!("could not stop async-profiler on pid {pid}: {err}");
                }
            }
        }
        let staged = self.ctx.config.staged_async_profiler_dir();
        if staged.exists()
            && let Err(err) = std::fs::remove_dir_all(&staged)
        {
            tracing::warn!("could not remove {}: {err}", staged.display());
        }
        self.ctx.purge_residue()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::profiler::test_support::Harness;

    fn harness(name: &str) -> (Harness, PathBuf) {
        let mut h = Harness::new(name);
        let src = h.root.join("app-async-profiler");
        std::fs::create_dir_all(src.join("lib")).expect("src");
        std::fs::write(src.join("profiler.sh"), "#!/bin/sh\n").expect("launcher");
        std::fs::write(src.join("lib/libasyncProfiler.so"), "elf").expect("lib");
        h.configure(|c| c.async_profiler_dir = src);
        let rootfs = h.containerd("abc", "1000", "/app");
        h.exec.on("profiler.sh -o", |spec| {
            let at = spec.args.iter().position(|a| a == "-f").expect("-f");
            std::fs::write(&spec.args[at + 1], "<html>flame</html>").expect("write result");
            CommandOutput::ok(Vec::new())
        });
        (h, rootfs)
    }

    #[test]
    fn command_line_matches_launcher_contract() {
        let (h, _) = harness("ap-cmd");
        let p = AsyncProfiler::new(h.ctx.clone());
        let mut job = h.job("java", "async-profiler", "flamegraph", &[("pid", "1000"), ("event", "cpu")]);
        job.interval = Duration::from_secs(30);
        let file = PathBuf::from("/tmp/agent-flamegraph-1000-0.html");
        let spec = p.record_command(&job, "1000", &file);
        assert_eq!(
            spec.args,
            vec![
                "-o", "flamegraph", "-d", "30", "-f", "/tmp/agent-flamegraph-1000-0.html",
                "-e", "cpu", "--fdtransfer", "1000",
            ]
        );
        job.output_type = OutputType::Raw;
        assert_eq!(p.record_command(&job, "1000", &file).args[1], "collapsed");
    }

    #[test]
    fn full_cycle_stages_profiles_and_cleans() {
        let (h, rootfs) = harness("ap-cycle");
        let p = AsyncProfiler::new(h.ctx.clone());
        let job = h.job(
            "java",
            "async-profiler",
            "flamegraph",
            &[("pid", "1000"), ("compressor", "gzip")],
        );
        p.set_up(&job).expect("set up");
        assert!(rootfs.join("tmp/async-profiler/profiler.sh").exists());

        p.invoke(&job).expect("invoke");
        let files = h.result_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("agent-flamegraph-1000-0.html.gz"));
        assert!(rootfs.join("tmp/agent-flamegraph-1000-0.html.gz").exists());

        p.clean_up(&job).expect("clean up");
        assert!(h.exec.command_lines().iter().any(|l| l.ends_with("profiler.sh stop 1000")));
        assert!(!rootfs.join("tmp/async-profiler").exists());
        assert!(!rootfs.join("tmp/agent-flamegraph-1000-0.html").exists());
        p.clean_up(&job).expect("clean up twice");
    }

    #[test]
    fn failing_attach_surfaces_stderr() {
        let (h, _) = harness("ap-fail");
        let p = AsyncProfiler::new(h.ctx.clone());
        h.exec.on("profiler.sh -o", |_| CommandOutput::failed(1, "Could not start attach mechanism"));
        let job = h.job("java", "async-profiler", "flamegraph", &[("pid", "1000")]);
        p.set_up(&job).expect("set up");
        let err = p.invoke(&job).expect_err("attach fails");
        let crate::AgentError::ProfilerFailure { tool, code, stderr } = err else {
            panic!("expected profiler failure");
        };
        assert_eq!(tool, "async-profiler");
        assert_eq!(code, Some(1));
        assert_eq!(stderr, "Could not start attach mechanism");
        assert!(h.result_files().is_empty());
    }
}
