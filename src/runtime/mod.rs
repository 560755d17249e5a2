//! Container-runtime adapters: where a container's filesystem and init
//! process live on the node.

mod containerd;
mod crio;

pub use containerd::*;
pub use crio::*;

use serde::Deserialize;

use std::path::{Path, PathBuf};

use crate::api::ContainerRuntime;
use crate::{AgentError, AgentResult};

pub trait RuntimeAdapter: Send + Sync {
    fn root_filesystem(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf>;

    fn pid(&self, container_id: &str, runtime_path: &Path) -> AgentResult<String>;

    /// Working directory of the container's main process, inside its rootfs.
    fn cwd(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf>;

    /// Host path of the container's working directory.
    fn host_cwd(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf> {
        let root = self.root_filesystem(container_id, runtime_path)?;
        let cwd = self.cwd(container_id, runtime_path)?;
        Ok(root.join(cwd.strip_prefix("/").unwrap_or(&cwd)))
    }
}

pub fn adapter_for(kind: ContainerRuntime) -> &'static dyn RuntimeAdapter {
    match kind {
        ContainerRuntime::Crio => &Crio,
        ContainerRuntime::Containerd => &Containerd,
    }
}

/// Strips the `cri-o://` / `containerd://` scheme Kubernetes reports.
pub fn normalize_container_id(id: &str) -> String {
    let id = id.trim();
    ContainerRuntime::ALL
        .iter()
        .find_map(|rt| id.strip_prefix(rt.id_prefix()))
        .unwrap_or(id)
        .to_string()
}

fn require(container_id: &str, runtime_path: &Path) -> AgentResult<()> {
    if container_id.trim().is_empty() {
        return Err(AgentError::BadArgument(
            "container id must not be empty".to_string(),
        ));
    }
    if runtime_path.as_os_str().is_empty() {
        return Err(AgentError::BadArgument(
            "container runtime path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn unreachable_err(what: &str, path: &Path, err: impl std::fmt::Display) -> AgentError {
    AgentError::ContainerUnreachable(format!("{what} {}: {err}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> AgentResult<T> {
    let raw = std::fs::read(path).map_err(|e| unreachable_err(what, path, e))?;
    serde_json::from_slice(&raw).map_err(|e| unreachable_err(what, path, e))
}

/// The parts of an OCI runtime spec the agent reads.
#[derive(Debug, Deserialize)]
struct OciSpec {
    #[serde(default)]
    root: Option<OciRoot>,
    #[serde(default)]
    process: Option<OciProcess>,
}

#[derive(Debug, Deserialize)]
struct OciRoot {
    path: String,
}

#[derive(Debug, Deserialize)]
struct OciProcess {
    #[serde(default)]
    cwd: String,
}

fn spec_cwd(spec: OciSpec, path: &Path) -> AgentResult<PathBuf> {
    match spec.process {
        Some(p) if !p.cwd.is_empty() => Ok(PathBuf::from(p.cwd)),
        _ => Err(unreachable_err("no process.cwd in", path, "missing field")),
    }
}
