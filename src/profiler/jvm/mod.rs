//! JVM profilers. Both share the agent tmp dir with the target container so
//! files the JVM writes from inside its namespace are visible to the agent.

mod async_profiler;
mod jcmd;

pub use async_profiler::*;
pub use jcmd::*;

use std::path::PathBuf;

use super::ProfilerContext;
use crate::api::PROFILING_PREFIX;
use crate::job::ProfilingJob;
use crate::runtime::adapter_for;
use crate::{AgentError, AgentResult, fsutil};

/// Points the agent tmp dir at `<target rootfs>/tmp` and drops stale
/// artifacts of the same output type. Returns the target tmp path.
pub(crate) fn link_tmp_to_target(ctx: &ProfilerContext, job: &ProfilingJob) -> AgentResult<PathBuf> {
    let target_tmp = match job.pid {
        // With an explicit pid the process may not belong to a known
        // container; reach its tmp through procfs.
        Some(ref pid) if job.container_id.is_empty() => PathBuf::from(format!("/proc/{pid}/root/tmp")),
        _ => adapter_for(job.container_runtime)
            .root_filesystem(&job.container_id, &job.container_runtime_path)
            .map_err(|e| AgentError::ContainerUnreachable(e.to_string()))?
            .join("tmp"),
    };
    std::fs::create_dir_all(&target_tmp)?;
    fsutil::replace_with_symlink(ctx.tmp_dir(), &target_tmp)?;
    let removed =
        fsutil::purge_matching(&target_tmp, &format!("{PROFILING_PREFIX}{}*", job.output_type))?;
    if removed > 0 {
        tracing::debug!("removed {removed} stale artifacts from {}", target_tmp.display());
    }
    Ok(target_tmp)
}
