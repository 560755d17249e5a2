//! `agent.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the optional config file inside the agent image.
pub const DEFAULT_CONFIG_PATH: &str = "/app/agent.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent temporary directory; every artifact is written here.
    pub tmp_dir: PathBuf,

    pub async_profiler_dir: PathBuf,
    pub jcmd_path: PathBuf,
    pub jfr_settings_path: PathBuf,
    pub pyspy_path: PathBuf,
    pub rbspy_path: PathBuf,
    pub bcc_profiler_path: PathBuf,
    pub libbpf_profiler_path: PathBuf,
    pub perf_path: PathBuf,
    pub stackcollapse_perf_path: PathBuf,
    pub flamegraph_script_path: PathBuf,
    pub cargo_flamegraph_path: PathBuf,

    pub ps_path: PathBuf,
    pub gzip_path: PathBuf,
    pub split_path: PathBuf,

    /// Pause between per-PID task submissions within one iteration.
    pub submission_delay_ms: u64,
    /// Raw stack files shorter than this are treated as empty.
    pub min_raw_size_bytes: u64,
    pub jfr_poll_interval_ms: u64,
    pub heap_snapshot_poll_interval_ms: u64,
    pub heap_snapshot_retries: u32,
    /// How long to wait for the native flamegraph recorder to flush its output.
    pub flamegraph_flush_wait_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("/tmp"),
            async_profiler_dir: PathBuf::from("/app/async-profiler"),
            jcmd_path: PathBuf::from("/opt/jdk/bin/jcmd"),
            jfr_settings_path: PathBuf::from("/app/jfr/settings/jfr-profile.jfc"),
            pyspy_path: PathBuf::from("/app/py-spy"),
            rbspy_path: PathBuf::from("/app/rbspy"),
            bcc_profiler_path: PathBuf::from("/app/bcc-profiler/profile"),
            libbpf_profiler_path: PathBuf::from("/app/libbpf-profiler/profile"),
            perf_path: PathBuf::from("/app/perf"),
            stackcollapse_perf_path: PathBuf::from("/app/FlameGraph/stackcollapse-perf.pl"),
            flamegraph_script_path: PathBuf::from("/app/FlameGraph/flamegraph.pl"),
            cargo_flamegraph_path: PathBuf::from("/app/flamegraph"),
            ps_path: PathBuf::from("ps"),
            gzip_path: PathBuf::from("gzip"),
            split_path: PathBuf::from("split"),
            submission_delay_ms: 5_000,
            min_raw_size_bytes: 50,
            jfr_poll_interval_ms: 1_000,
            heap_snapshot_poll_interval_ms: 1_000,
            heap_snapshot_retries: 120,
            flamegraph_flush_wait_ms: 5_000,
        }
    }
}

impl AgentConfig {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<AgentConfig>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn submission_delay(&self) -> Duration {
        Duration::from_millis(self.submission_delay_ms)
    }

    pub fn jfr_poll_interval(&self) -> Duration {
        Duration::from_millis(self.jfr_poll_interval_ms)
    }

    pub fn heap_snapshot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.heap_snapshot_poll_interval_ms)
    }

    pub fn flamegraph_flush_wait(&self) -> Duration {
        Duration::from_millis(self.flamegraph_flush_wait_ms)
    }

    /// Staged copy of the async-profiler tree inside the shared tmp dir.
    pub fn staged_async_profiler_dir(&self) -> PathBuf {
        self.tmp_dir.join("async-profiler")
    }

    pub fn staged_jfr_settings(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("{}settings.jfc", crate::api::PROFILING_PREFIX))
    }
}
