//! Mapping a container to the processes worth profiling.

use std::path::PathBuf;
use std::sync::Arc;

use crate::exec::{CommandSpec, Executor};
use crate::job::ProfilingJob;
use crate::runtime::adapter_for;
use crate::{AgentError, AgentResult};

/// Bound on launcher chains followed while descending single children.
const MAX_DEPTH: usize = 32;

pub struct ProcessDiscovery {
    executor: Arc<dyn Executor>,
    ps: PathBuf,
}

impl ProcessDiscovery {
    pub fn new(executor: Arc<dyn Executor>, ps: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            ps: ps.into(),
        }
    }

    /// Candidate PIDs for `job`: the explicit `pid` if given, otherwise the
    /// container's root process expanded through its child tree and
    /// optionally filtered by the `pgrep` substring.
    pub fn candidate_pids(&self, job: &ProfilingJob) -> AgentResult<Vec<String>> {
        if let Some(pid) = &job.pid {
            return Ok(vec![pid.clone()]);
        }
        let root = self.root_pid(job)?;
        let candidates = self.expand(&root)?;
        if candidates.is_empty() {
            return Err(AgentError::DiscoveryFailed(format!(
                "no processes found for container {}",
                job.container_id
            )));
        }
        let Some(predicate) = &job.pgrep else {
            return Ok(candidates);
        };

        let mut filtered = Vec::new();
        for pid in &candidates {
            if self.matches(pid, predicate)? {
                filtered.push(pid.clone());
            }
        }
        if filtered.is_empty() {
            tracing::warn!(
                "no process matches {predicate:?}, profiling all candidates: {}",
                candidates.join(",")
            );
            return Ok(candidates);
        }
        Ok(filtered)
    }

    /// The single child of `root` when there is exactly one, else `root`.
    pub fn first_candidate_pid(&self, root: &str) -> AgentResult<String> {
        let children = self.children_of(root)?;
        match children.as_slice() {
            [only] => Ok(only.clone()),
            _ => Ok(root.to_string()),
        }
    }

    pub fn root_pid(&self, job: &ProfilingJob) -> AgentResult<String> {
        adapter_for(job.container_runtime)
            .pid(&job.container_id, &job.container_runtime_path)
            .map_err(|e| match e {
                AgentError::BadArgument(_) => e,
                other => AgentError::ContainerUnreachable(other.to_string()),
            })
    }

    fn expand(&self, root: &str) -> AgentResult<Vec<String>> {
        let mut current = root.to_string();
        for _ in 0..MAX_DEPTH {
            let children = self.children_of(&current)?;
            match children.len() {
                0 => return Ok(vec![current]),
                1 => current = children[0].clone(),
                _ => return Ok(children),
            }
        }
        tracing::warn!("process tree under {root} is deeper than {MAX_DEPTH}, stopping at {current}");
        Ok(vec![current])
    }

    fn children_of(&self, pid: &str) -> AgentResult<Vec<String>> {
        let out = self.executor.run(
            &CommandSpec::new(&self.ps)
                .arg("--ppid")
                .arg(pid)
                .args(["-o", "pid="]),
        )?;
        let stdout = out.stdout_text();
        // ps exits 1 when no process matches the selection.
        if !out.success() && !(stdout.trim().is_empty() && out.stderr.is_empty()) {
            return Err(AgentError::DiscoveryFailed(format!(
                "listing children of {pid}: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(stdout
            .split_whitespace()
            .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .collect())
    }

    fn matches(&self, pid: &str, predicate: &str) -> AgentResult<bool> {
        let out = self.executor.run(
            &CommandSpec::new(&self.ps)
                .args(["-p", pid])
                .args(["-o", "comm=", "-o", "args="]),
        )?;
        if !out.success() {
            return Ok(false);
        }
        Ok(out.stdout_text().contains(predicate))
    }
}
