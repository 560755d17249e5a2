use serde::Deserialize;

use std::path::{Path, PathBuf};

use super::{OciSpec, RuntimeAdapter, read_json, require, spec_cwd, unreachable_err};
use crate::AgentResult;

/// CRI-O stores the OCI spec and runtime state under `overlay-containers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crio;

#[derive(Debug, Deserialize)]
struct CrioState {
    pid: u32,
}

impl Crio {
    fn userdata(container_id: &str, runtime_path: &Path) -> PathBuf {
        runtime_path
            .join("overlay-containers")
            .join(container_id)
            .join("userdata")
    }
}

impl RuntimeAdapter for Crio {
    fn root_filesystem(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf> {
        require(container_id, runtime_path)?;
        let path = Self::userdata(container_id, runtime_path).join("config.json");
        let spec: OciSpec = read_json(&path, "cannot read runtime spec")?;
        match spec.root {
            Some(root) if !root.path.is_empty() => Ok(PathBuf::from(root.path)),
            _ => Err(unreachable_err("no root.path in", &path, "missing field")),
        }
    }

    fn pid(&self, container_id: &str, runtime_path: &Path) -> AgentResult<String> {
        require(container_id, runtime_path)?;
        let path = Self::userdata(container_id, runtime_path).join("state.json");
        let state: CrioState = read_json(&path, "cannot read runtime state")?;
        if state.pid == 0 {
            return Err(unreachable_err("container not running per", &path, "pid 0"));
        }
        Ok(state.pid.to_string())
    }

    fn cwd(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf> {
        require(container_id, runtime_path)?;
        let path = Self::userdata(container_id, runtime_path).join("config.json");
        let spec: OciSpec = read_json(&path, "cannot read runtime spec")?;
        spec_cwd(spec, &path)
    }
}
