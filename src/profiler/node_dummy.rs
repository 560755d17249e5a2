use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Profiler, ProfilerContext};
use crate::job::ProfilingJob;
use crate::runtime::adapter_for;
use crate::{AgentError, AgentResult, fsutil};

const SNAPSHOT_PATTERN: &str = "*.heapsnapshot*";

/// Asks a Node.js process for a heap snapshot by signal and collects the
/// file the runtime writes into its working directory.
pub struct NodeDummyProfiler {
    ctx: ProfilerContext,
    cwd: Mutex<Option<PathBuf>>,
}

impl NodeDummyProfiler {
    pub fn new(ctx: ProfilerContext) -> Self {
        Self {
            ctx,
            cwd: Mutex::new(None),
        }
    }

    fn snapshot_dir(&self) -> AgentResult<PathBuf> {
        self.cwd
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| {
                AgentError::DiscoveryFailed("profiler invoked before set up resolved the cwd".to_string())
            })
    }

    fn target_pid(&self, job: &ProfilingJob) -> AgentResult<String> {
        if let Some(pid) = &job.pid {
            return Ok(pid.clone());
        }
        let discovery = self.ctx.discovery();
        let root = discovery.root_pid(job)?;
        discovery.first_candidate_pid(&root)
    }

    /// Polls `dir` until a non-empty snapshot shows up whose size did not
    /// change since the previous poll.
    fn await_snapshot(&self, dir: &std::path::Path, pid: &str) -> AgentResult<PathBuf> {
        let poll = self.ctx.config.heap_snapshot_poll_interval();
        let retries = self.ctx.config.heap_snapshot_retries;
        let mut previous: Option<u64> = None;
        let mut retry = 0;
        loop {
            std::thread::sleep(poll);
            let found = fsutil::find_matching_files(dir, SNAPSHOT_PATTERN)?.into_iter().next();
            match found {
                Some(file) => {
                    let current = fsutil::file_size(&file)?;
                    if current > 0 && previous == Some(current) {
                        return Ok(file);
                    }
                    previous = Some(current);
                }
                None => previous = None,
            }
            if retry == retries {
                return Err(AgentError::MissingInput(format!(
                    "no heapsnapshot files found (PID: {pid})"
                )));
            }
            retry += 1;
            tracing::debug!("no complete heapsnapshot available yet (PID: {pid}), retrying");
        }
    }
}

impl Profiler for NodeDummyProfiler {
    fn set_up(&self, job: &ProfilingJob) -> AgentResult<()> {
        let cwd = match job.pid {
            Some(ref pid) if job.container_id.is_empty() => PathBuf::from(format!("/proc/{pid}/cwd")),
            _ => adapter_for(job.container_runtime)
                .host_cwd(&job.container_id, &job.container_runtime_path)
                .map_err(|e| AgentError::ContainerUnreachable(e.to_string()))?,
        };
        tracing::debug!("heap snapshots are collected from {}", cwd.display());
        let removed = fsutil::purge_matching(&cwd, SNAPSHOT_PATTERN)?;
        if removed > 0 {
            tracing::debug!("removed {removed} snapshots left by a previous run");
        }
        *self.cwd.lock().unwrap_or_else(|p| p.into_inner()) = Some(cwd);
        Ok(())
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        let start = Instant::now();
        let dir = self.snapshot_dir()?;
        let pid = self.target_pid(job)?;
        let numeric: i32 = pid
            .parse()
            .map_err(|_| AgentError::DiscoveryFailed(format!("invalid pid {pid:?}")))?;

        self.ctx
            .executor
            .kill(numeric, job.node_heap_snapshot_signal)
            .map_err(|e| AgentError::ProfilerFailure {
                tool: "node-dummy".to_string(),
                code: None,
                stderr: format!(
                    "unable to send signal {} to target process (PID: {pid}): {e}",
                    job.node_heap_snapshot_signal
                ),
            })?;

        let snapshot = self.await_snapshot(&dir, &pid)?;
        let result = self
            .ctx
            .result_file(job.tool, job.output_type, &pid, job.iteration);
        std::fs::copy(&snapshot, &result)?;
        if let Err(err) = std::fs::remove_file(&snapshot) {
            tracing::warn!("the file could not be removed: {}: {err}", snapshot.display());
        }

        self.ctx.publish(job, &result)?;
        Ok(start.elapsed())
    }

    fn clean_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        self.ctx.purge_residue()?;
        Ok(())
    }
}
