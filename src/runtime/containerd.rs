use std::path::{Path, PathBuf};

use super::{OciSpec, RuntimeAdapter, read_json, require, spec_cwd, unreachable_err};
use crate::AgentResult;

/// containerd keeps one task bundle per container under the k8s.io namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct Containerd;

impl Containerd {
    fn bundle(container_id: &str, runtime_path: &Path) -> PathBuf {
        runtime_path
            .join("io.containerd.runtime.v2.task")
            .join("k8s.io")
            .join(container_id)
    }
}

impl RuntimeAdapter for Containerd {
    fn root_filesystem(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf> {
        require(container_id, runtime_path)?;
        let rootfs = Self::bundle(container_id, runtime_path).join("rootfs");
        if !rootfs.exists() {
            return Err(unreachable_err("missing rootfs", &rootfs, "not found"));
        }
        Ok(rootfs)
    }

    fn pid(&self, container_id: &str, runtime_path: &Path) -> AgentResult<String> {
        require(container_id, runtime_path)?;
        let bundle = Self::bundle(container_id, runtime_path);
        let primary = bundle.join("init.pid");
        let raw = match std::fs::read_to_string(&primary) {
            Ok(raw) => raw,
            Err(_) => {
                let fallback = bundle.join(format!("{container_id}.pid"));
                std::fs::read_to_string(&fallback)
                    .map_err(|e| unreachable_err("cannot read pid file", &fallback, e))?
            }
        };
        let pid = raw.trim();
        if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_digit()) {
            return Err(unreachable_err("invalid pid file in", &bundle, format!("{pid:?}")));
        }
        Ok(pid.to_string())
    }

    fn cwd(&self, container_id: &str, runtime_path: &Path) -> AgentResult<PathBuf> {
        require(container_id, runtime_path)?;
        let path = Self::bundle(container_id, runtime_path).join("config.json");
        let spec: OciSpec = read_json(&path, "cannot read runtime spec")?;
        spec_cwd(spec, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentError;
    use uuid::Uuid;

    fn layout(name: &str) -> (PathBuf, PathBuf) {
        let root =
            std::env::temp_dir().join(format!("podprof-containerd-{name}-{}", Uuid::new_v4()));
        let bundle = root.join("io.containerd.runtime.v2.task/k8s.io/abc");
        std::fs::create_dir_all(bundle.join("rootfs")).expect("mkdir");
        (root, bundle)
    }

    #[test]
    fn reads_rootfs_pid_and_cwd() {
        let (root, bundle) = layout("happy");
        std::fs::write(bundle.join("init.pid"), "1234\n").expect("pid");
        std::fs::write(bundle.join("config.json"), r#"{"process":{"cwd":"/app"}}"#)
            .expect("spec");
        let c = Containerd;
        assert_eq!(c.root_filesystem("abc", &root).expect("rootfs"), bundle.join("rootfs"));
        assert_eq!(c.pid("abc", &root).expect("pid"), "1234");
        assert_eq!(c.cwd("abc", &root).expect("cwd"), PathBuf::from("/app"));
        assert_eq!(
            c.host_cwd("abc", &root).expect("host cwd"),
            bundle.join("rootfs").join("app")
        );
    }

    #[test]
    fn pid_falls_back_to_container_pid_file() {
        let (root, bundle) = layout("fallback");
        std::fs::write(bundle.join("abc.pid"), "77").expect("pid");
        assert_eq!(Containerd.pid("abc", &root).expect("pid"), "77");
    }

    #[test]
    fn missing_state_is_unreachable() {
        let (root, _) = layout("missing");
        assert!(matches!(
            Containerd.pid("abc", &root),
            Err(AgentError::ContainerUnreachable(_))
        ));
        assert!(matches!(
            Containerd.root_filesystem("zzz", &root),
            Err(AgentError::ContainerUnreachable(_))
        ));
        assert!(matches!(
            Containerd.cwd("abc", &root),
            Err(AgentError::ContainerUnreachable(_))
        ));
    }
}
