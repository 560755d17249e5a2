//! Profiler state machines and the factory that picks one per tool.
//!
//! Every profiler goes through `set_up` once, `invoke` once per iteration
//! and `clean_up` at shutdown. `invoke` fans out over the candidate PIDs
//! with one worker per PID and a stagger between submissions.

mod bpf;
mod fake;
mod jvm;
mod node_dummy;
mod perf;
mod python;
mod ruby;
mod rust;

pub use bpf::*;
pub use fake::*;
pub use jvm::*;
pub use node_dummy::*;
pub use perf::*;
pub use python::*;
pub use ruby::*;
pub use rust::*;

use nix::sys::signal::Signal;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::api::{OutputType, ProfilingTool, result_file_name};
use crate::config::AgentConfig;
use crate::discovery::ProcessDiscovery;
use crate::event_logger::EventLogger;
use crate::exec::{ChildHandle, CommandOutput, CommandSpec, Executor};
use crate::flamegraph::{FlameGraphOptions, FlameGraphRenderer};
use crate::job::ProfilingJob;
use crate::publish::Publisher;
use crate::{AgentError, AgentResult};

pub trait Profiler: Send + Sync {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()>;

    /// Runs one iteration and reports how long it took.
    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration>;

    fn clean_up(&self, job: &ProfilingJob) -> AgentResult<()>;
}

/// Collaborators shared by every profiler.
#[derive(Clone)]
pub struct ProfilerContext {
    pub config: Arc<AgentConfig>,
    pub executor: Arc<dyn Executor>,
    pub logger: Arc<EventLogger>,
    /// Process groups of tools that are still running.
    pub children: Arc<ChildGroups>,
}

impl ProfilerContext {
    pub fn new(
        config: Arc<AgentConfig>,
        executor: Arc<dyn Executor>,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            config,
            executor,
            logger,
            children: Arc::new(ChildGroups::default()),
        }
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.config.tmp_dir
    }

    pub fn discovery(&self) -> ProcessDiscovery {
        ProcessDiscovery::new(self.executor.clone(), &self.config.ps_path)
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            self.executor.clone(),
            self.logger.clone(),
            &self.config.gzip_path,
            &self.config.split_path,
        )
    }

    pub fn renderer(&self, job: &ProfilingJob) -> AgentResult<FlameGraphRenderer> {
        let options = FlameGraphOptions::for_job(&self.config.flamegraph_script_path, job)?;
        Ok(FlameGraphRenderer::new(self.executor.clone(), options))
    }

    pub fn result_file(
        &self,
        tool: ProfilingTool,
        output: OutputType,
        pid: &str,
        iteration: u32,
    ) -> PathBuf {
        result_file_name(self.tmp_dir(), tool, output, pid, iteration)
    }

    /// Publishes one finished artifact: heap outputs are gzip-split, the
    /// rest go through the job's compressor.
    pub fn publish(&self, job: &ProfilingJob, file: &Path) -> AgentResult<PathBuf> {
        let publisher = self.publisher();
        if job.output_type.is_heap_artifact() {
            publisher.publish_split(file, &job.heap_dump_split_in_chunk_size, job.output_type)
        } else {
            publisher.publish(job.compressor, file, job.output_type)
        }
    }

    /// Runs `spec`, turning a non-zero exit into `ProfilerFailure`.
    pub fn run_tool(&self, tool: &str, spec: &CommandSpec) -> AgentResult<CommandOutput> {
        let out = self.executor.run(spec)?;
        if !out.success() {
            return Err(AgentError::profiler_failure(tool, out.code, &out.stderr));
        }
        Ok(out)
    }

    /// Like `run_tool`, but the child leads its own process group and stays
    /// registered in `children` until it exits.
    pub fn run_tracked(&self, tool: &str, spec: &CommandSpec) -> AgentResult<CommandOutput> {
        let mut child = self.executor.spawn(&spec.clone().process_group())?;
        let pgid = child_group(tool, child.as_ref())?;
        self.children.insert(pgid);
        let waited = child.wait();
        self.children.remove(pgid);
        let out = waited?;
        if !out.success() {
            return Err(AgentError::profiler_failure(tool, out.code, &out.stderr));
        }
        Ok(out)
    }

    /// Sends SIGTERM to every registered process group. Failures are logged.
    pub fn terminate_running(&self) {
        for pgid in self.children.running() {
            tracing::debug!("stopping profiler group {pgid}");
            if let Err(err) = self.executor.kill(-pgid, Signal::SIGTERM as i32) {
                tracing::warn!("could not stop profiler group {pgid}: {err}");
            }
        }
    }

    /// Removes every artifact carrying the profiling prefix under tmp.
    pub fn purge_residue(&self) -> AgentResult<usize> {
        crate::fsutil::purge_matching(self.tmp_dir(), &format!("{}*", crate::api::PROFILING_PREFIX))
    }
}

pub fn profiler_for(tool: ProfilingTool, ctx: ProfilerContext) -> Arc<dyn Profiler> {
    match tool {
        ProfilingTool::Jcmd => Arc::new(JcmdProfiler::new(ctx)),
        ProfilingTool::AsyncProfiler => Arc::new(AsyncProfiler::new(ctx)),
        ProfilingTool::Bpf => Arc::new(BpfProfiler::new(ctx, BpfVariant::Bcc)),
        ProfilingTool::Btf => Arc::new(BpfProfiler::new(ctx, BpfVariant::Libbpf)),
        ProfilingTool::Pyspy => Arc::new(PythonProfiler::new(ctx)),
        ProfilingTool::Rbspy => Arc::new(RubyProfiler::new(ctx)),
        ProfilingTool::Perf => Arc::new(PerfProfiler::new(ctx)),
        ProfilingTool::CargoFlame => Arc::new(CargoFlameProfiler::new(ctx)),
        ProfilingTool::NodeDummy => Arc::new(NodeDummyProfiler::new(ctx)),
        ProfilingTool::Fake => Arc::new(FakeProfiler::new()),
    }
}

#[derive(Default)]
pub struct ChildGroups {
    groups: Mutex<BTreeSet<i32>>,
}

impl ChildGroups {
    pub fn running(&self) -> Vec<i32> {
        self.lock().iter().copied().collect()
    }

    fn insert(&self, pgid: i32) {
        self.lock().insert(pgid);
    }

    fn remove(&self, pgid: i32) {
        self.lock().remove(&pgid);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<i32>> {
        self.groups.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn child_group(tool: &str, child: &dyn ChildHandle) -> AgentResult<i32> {
    i32::try_from(child.id()).map_err(|_| AgentError::ProfilerFailure {
        tool: tool.to_string(),
        code: None,
        stderr: format!("child id {} out of range", child.id()),
    })
}

/// Candidate PIDs resolved during `set_up`.
#[derive(Default)]
pub struct TargetPids {
    pids: Mutex<Vec<String>>,
}

impl TargetPids {
    pub fn set(&self, pids: Vec<String>) {
        *self.pids.lock().unwrap_or_else(|p| p.into_inner()) = pids;
    }

    pub fn get(&self) -> Vec<String> {
        self.pids.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn require(&self) -> AgentResult<Vec<String>> {
        let pids = self.get();
        if pids.is_empty() {
            return Err(AgentError::DiscoveryFailed(
                "profiler invoked before set up resolved any pid".to_string(),
            ));
        }
        Ok(pids)
    }
}

/// Runs `task` once per PID on a pool with one worker per PID, sleeping
/// `delay` between submissions. The first error wins.
pub fn fan_out<F>(pids: &[String], delay: Duration, task: F) -> AgentResult<Duration>
where
    F: Fn(&str) -> AgentResult<()> + Sync,
{
    let start = Instant::now();
    if pids.is_empty() {
        return Ok(start.elapsed());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pids.len())
        .thread_name(|i| format!("profile-worker-{i}"))
        .build()
        .map_err(|e| AgentError::Io(std::io::Error::other(e.to_string())))?;

    let first_error: Mutex<Option<AgentError>> = Mutex::new(None);
    pool.scope(|s| {
        for (i, pid) in pids.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let task = &task;
            let first_error = &first_error;
            s.spawn(move |_| {
                if let Err(err) = task(pid) {
                    tracing::debug!("task for pid {pid} failed: {err}");
                    first_error
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .get_or_insert(err);
                }
            });
        }
    });

    match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(err) => Err(err),
        None => Ok(start.elapsed()),
    }
}

/// Reports low-sample iterations and lets the run continue.
pub(crate) fn tolerate_insufficient_samples(pid: &str, result: AgentResult<()>) -> AgentResult<()> {
    match result {
        Err(err) if err.is_insufficient_samples() => {
            tracing::error!("pid {pid}: {err}");
            Ok(())
        }
        other => other,
    }
}

/// Prefixes every non-empty line with `process: <pid>;`, writing to `output`.
pub(crate) fn tag_stacks_with_pid(raw: &[u8], pid: &str, output: &Path) -> AgentResult<u64> {
    let text = String::from_utf8_lossy(raw);
    let mut tagged = String::with_capacity(raw.len() + 32);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        tagged.push_str("process: ");
        tagged.push_str(pid);
        tagged.push(';');
        tagged.push_str(line);
        tagged.push('\n');
    }
    std::fs::write(output, tagged.as_bytes())?;
    Ok(tagged.len() as u64)
}

/// Fails with `InsufficientSamples` when `raw` is below the configured size.
pub(crate) fn check_raw_size(raw: &Path, min_bytes: u64) -> AgentResult<()> {
    let size = std::fs::metadata(raw).map(|m| m.len()).unwrap_or(0);
    if size < min_bytes {
        return Err(AgentError::InsufficientSamples(format!(
            "{} holds {size} bytes",
            raw.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::job::AgentArgs;
    use crate::testing::{ScriptedExecutor, SharedBuffer};
    use uuid::Uuid;

    pub struct Harness {
        pub ctx: ProfilerContext,
        pub exec: Arc<ScriptedExecutor>,
        pub out: SharedBuffer,
        pub root: PathBuf,
    }

    impl Harness {
        pub fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("podprof-{name}-{}", Uuid::new_v4()));
            let tmp = root.join("agent-tmp");
            std::fs::create_dir_all(&tmp).expect("tmp");
            let config = AgentConfig {
                tmp_dir: tmp,
                submission_delay_ms: 0,
                jfr_poll_interval_ms: 10,
                heap_snapshot_poll_interval_ms: 10,
                flamegraph_flush_wait_ms: 200,
                ..AgentConfig::default()
            };
            let exec = Arc::new(ScriptedExecutor::new());
            let out = SharedBuffer::default();
            let logger = Arc::new(EventLogger::with_writer(Box::new(out.clone()), true));
            let ctx = ProfilerContext::new(Arc::new(config), exec.clone(), logger);
            Self { ctx, exec, out, root }
        }

        pub fn configure(&mut self, f: impl FnOnce(&mut AgentConfig)) {
            let mut config = (*self.ctx.config).clone();
            f(&mut config);
            self.ctx.config = Arc::new(config);
        }

        pub fn tmp(&self) -> PathBuf {
            self.ctx.config.tmp_dir.clone()
        }

        /// A containerd layout under the harness root with rootfs and pid.
        pub fn containerd(&self, id: &str, pid: &str, cwd: &str) -> PathBuf {
            let bundle = self
                .root
                .join("containerd/io.containerd.runtime.v2.task/k8s.io")
                .join(id);
            std::fs::create_dir_all(bundle.join("rootfs/tmp")).expect("rootfs");
            std::fs::write(bundle.join("init.pid"), pid).expect("pid");
            std::fs::write(
                bundle.join("config.json"),
                format!(r#"{{"process":{{"cwd":"{cwd}"}}}}"#),
            )
            .expect("spec");
            bundle.join("rootfs")
        }

        pub fn job(&self, lang: &str, tool: &str, output: &str, extra: &[(&str, &str)]) -> ProfilingJob {
            let mut args = AgentArgs {
                target_container_id: "abc".to_string(),
                target_container_runtime_path: self.root.join("containerd").to_string_lossy().to_string(),
                lang: lang.to_string(),
                profiling_tool: tool.to_string(),
                output_type: output.to_string(),
                duration: "1s".to_string(),
                compressor_type: "none".to_string(),
                ..AgentArgs::default()
            };
            for (k, v) in extra {
                match *k {
                    "pid" => args.pid = v.to_string(),
                    "duration" => args.duration = v.to_string(),
                    "interval" => args.interval = v.to_string(),
                    "compressor" => args.compressor_type = v.to_string(),
                    "event" => args.event_type = v.to_string(),
                    "signal" => args.node_heap_snapshot_signal = v.parse().ok(),
                    "chunk" => args.heap_dump_split_in_chunk_size = v.to_string(),
                    other => args.additional_arguments.push(format!("{other}={v}")),
                }
            }
            ProfilingJob::from_args(&args).expect("job")
        }

        /// Stands in for the system `gzip -3` and `split -b` used by split
        /// publishing; the "compressed" file is the input renamed.
        pub fn native_gzip_split(&self, chunk: usize) {
            self.exec.on("gzip -3", |spec| {
                let file = PathBuf::from(&spec.args[1]);
                std::fs::rename(&file, format!("{}.gz", file.display())).expect("gzip");
                CommandOutput::ok(Vec::new())
            });
            self.exec.on("split -b", move |spec| {
                let data = std::fs::read(&spec.args[4]).expect("gz");
                for (i, part) in data.chunks(chunk).enumerate() {
                    std::fs::write(format!("{}{i:02}", spec.args[5]), part).expect("part");
                }
                CommandOutput::ok(Vec::new())
            });
        }

        pub fn result_files(&self) -> Vec<String> {
            self.out
                .events()
                .into_iter()
                .filter_map(|e| match e {
                    crate::api::Event::Result(r) => Some(r.file),
                    _ => None,
                })
                .collect()
        }
    }
}
