//! Crate-wide error types.

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("unsupported container runtime: {0}")]
    UnsupportedRuntime(String),

    #[error("unsupported profiling tool: {0}")]
    UnsupportedTool(String),

    #[error("unsupported output type: {0}")]
    UnsupportedOutput(String),

    #[error("container unreachable: {0}")]
    ContainerUnreachable(String),

    #[error("process discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("could not launch profiler {tool} (exit code: {code:?}): {stderr}")]
    ProfilerFailure {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not render flamegraph: {0}")]
    RendererFailure(String),

    #[error("unable to generate flamegraph: no stacks found (maybe due low cpu load): {0}")]
    InsufficientSamples(String),

    #[error("publish failed: {0}")]
    PublishFailure(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<walkdir::Error> for AgentError {
    fn from(value: walkdir::Error) -> Self {
        let msg = value.to_string();
        Self::Io(
            value
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other(msg)),
        )
    }
}

impl From<globset::Error> for AgentError {
    fn from(value: globset::Error) -> Self {
        Self::BadArgument(format!("invalid glob: {value}"))
    }
}

impl AgentError {
    pub fn profiler_failure(tool: impl Into<String>, code: Option<i32>, stderr: &[u8]) -> Self {
        Self::ProfilerFailure {
            tool: tool.into(),
            code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// True for the errors a sampling iteration reports without failing the run.
    pub fn is_insufficient_samples(&self) -> bool {
        matches!(self, Self::InsufficientSamples(_))
    }
}
