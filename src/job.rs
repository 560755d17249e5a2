//! Agent arguments and the profiling job built from them.

use clap::Args;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::{
    Compressor, ContainerRuntime, Language, OutputType, ProfilingEvent, ProfilingTool,
    default_output, default_tool, is_output_supported, is_tool_supported, tool_for,
};
use crate::runtime::normalize_container_id;
use crate::{AgentError, AgentResult, iterations, parse_duration};

const DEFAULT_DURATION: &str = "60s";
const DEFAULT_GRACE_PERIOD: &str = "5m";
const DEFAULT_CHUNK_SIZE: &str = "50M";
const DEFAULT_HEAP_SNAPSHOT_SIGNAL: i32 = 12;

/// Raw agent flags, as received on the command line.
#[derive(Debug, Clone, Default, Args)]
pub struct AgentArgs {
    #[arg(long, default_value = "")]
    pub job_id: String,
    #[arg(long, default_value = "")]
    pub target_container_runtime: String,
    #[arg(long, default_value = "")]
    pub target_container_runtime_path: String,
    #[arg(long, default_value = "")]
    pub target_pod_uid: String,
    #[arg(long, default_value = "")]
    pub target_container_id: String,
    #[arg(long, default_value = "")]
    pub duration: String,
    #[arg(long, default_value = "")]
    pub interval: String,
    #[arg(long, default_value = "")]
    pub lang: String,
    #[arg(long, default_value = "")]
    pub event_type: String,
    #[arg(long, default_value = "")]
    pub compressor_type: String,
    #[arg(long, default_value = "")]
    pub profiling_tool: String,
    #[arg(long, default_value = "")]
    pub output_type: String,
    #[arg(long, default_value = "")]
    pub filename: String,
    #[arg(long)]
    pub print_logs: bool,
    #[arg(long, default_value = "")]
    pub grace_period_ending: String,
    #[arg(long, default_value = "")]
    pub heap_dump_split_in_chunk_size: String,
    #[arg(long, default_value = "")]
    pub pid: String,
    #[arg(long, default_value = "")]
    pub pgrep: String,
    #[arg(long)]
    pub node_heap_snapshot_signal: Option<i32>,
    /// Extra profiler options as `key=value`; repeatable.
    #[arg(long = "additional-argument")]
    pub additional_arguments: Vec<String>,
}

/// Descriptor carried through the pipeline. Only `iteration` changes after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilingJob {
    pub uid: String,
    pub container_runtime: ContainerRuntime,
    pub container_runtime_path: PathBuf,
    pub container_id: String,
    pub pod_uid: String,
    pub pid: Option<String>,
    pub pgrep: Option<String>,
    pub duration: Duration,
    pub interval: Duration,
    pub iteration: u32,
    pub language: Language,
    pub event: ProfilingEvent,
    pub tool: ProfilingTool,
    pub output_type: OutputType,
    pub compressor: Compressor,
    pub file_name: String,
    pub heap_dump_split_in_chunk_size: String,
    pub node_heap_snapshot_signal: i32,
    pub additional_arguments: BTreeMap<String, String>,
    pub grace_period_ending: Duration,
    pub print_logs: bool,
}

fn non_blank(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn required<'a>(s: &'a str, flag: &str) -> AgentResult<&'a str> {
    non_blank(s).ok_or_else(|| AgentError::BadArgument(format!("--{flag} is required")))
}

impl ProfilingJob {
    pub fn from_args(args: &AgentArgs) -> AgentResult<Self> {
        let duration = parse_duration(non_blank(&args.duration).unwrap_or(DEFAULT_DURATION))?;
        let interval = match non_blank(&args.interval) {
            Some(raw) => parse_duration(raw)?,
            None => duration,
        };
        if interval > duration {
            return Err(AgentError::BadArgument(format!(
                "interval ({interval:?}) must not exceed duration ({duration:?})"
            )));
        }
        let grace_period_ending = parse_duration(
            non_blank(&args.grace_period_ending).unwrap_or(DEFAULT_GRACE_PERIOD),
        )?;

        let language: Language = required(&args.lang, "lang")?.parse()?;
        let event: ProfilingEvent = non_blank(&args.event_type).unwrap_or("itimer").parse()?;
        let compressor: Compressor = non_blank(&args.compressor_type).unwrap_or("gzip").parse()?;
        let container_runtime: ContainerRuntime = non_blank(&args.target_container_runtime)
            .unwrap_or("containerd")
            .parse()?;
        let container_runtime_path = PathBuf::from(
            non_blank(&args.target_container_runtime_path)
                .unwrap_or(container_runtime.default_path()),
        );

        let pid = non_blank(&args.pid).map(str::to_string);
        if let Some(pid) = &pid
            && !pid.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AgentError::BadArgument(format!("invalid pid {pid:?}")));
        }
        let container_id = normalize_container_id(&args.target_container_id);
        if container_id.is_empty() && pid.is_none() {
            return Err(AgentError::BadArgument(
                "--target-container-id is required".to_string(),
            ));
        }

        let requested_output = non_blank(&args.output_type);
        let tool = resolve_tool(language, requested_output, non_blank(&args.profiling_tool));
        let output_type = resolve_output(tool, requested_output);

        let additional_arguments = parse_additional_arguments(&args.additional_arguments)?;

        let uid = match non_blank(&args.job_id) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        Ok(Self {
            uid,
            container_runtime,
            container_runtime_path,
            container_id,
            pod_uid: args.target_pod_uid.trim().to_string(),
            pid,
            pgrep: non_blank(&args.pgrep).map(str::to_string),
            duration,
            interval,
            iteration: 0,
            language,
            event,
            tool,
            output_type,
            compressor,
            file_name: args.filename.trim().to_string(),
            heap_dump_split_in_chunk_size: non_blank(&args.heap_dump_split_in_chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .to_string(),
            node_heap_snapshot_signal: args
                .node_heap_snapshot_signal
                .unwrap_or(DEFAULT_HEAP_SNAPSHOT_SIGNAL),
            additional_arguments,
            grace_period_ending,
            print_logs: args.print_logs,
        })
    }

    /// `floor(duration / interval)`.
    pub fn iterations(&self) -> u32 {
        iterations(self.duration, self.interval)
    }

    pub fn additional_argument(&self, key: &str) -> Option<&str> {
        self.additional_arguments
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Picks the tool for `language`. Unknown or unsupported tools fall back to
/// the language default with a warning.
fn resolve_tool(language: Language, output: Option<&str>, requested: Option<&str>) -> ProfilingTool {
    let fallback = default_tool(language);
    let Some(raw) = requested else {
        let tool = match output.map(str::parse::<OutputType>) {
            Some(Ok(output)) => tool_for(language, output),
            _ => fallback,
        };
        tracing::info!("default profiling tool {tool} will be used");
        return tool;
    };
    let Ok(tool) = raw.parse::<ProfilingTool>() else {
        tracing::warn!("unsupported profiling tool {raw}, default {fallback} will be used");
        return fallback;
    };
    if is_tool_supported(language, tool) {
        return tool;
    }
    tracing::warn!(
        "unsupported profiling tool {tool} for language {language}, default {fallback} will be used"
    );
    fallback
}

/// Checks `requested` against what `tool` produces, falling back to the
/// tool's first output with a warning.
fn resolve_output(tool: ProfilingTool, requested: Option<&str>) -> OutputType {
    let fallback = default_output(tool);
    let Some(raw) = requested else {
        tracing::warn!("default output type {fallback} will be used");
        return fallback;
    };
    let Ok(output) = raw.parse::<OutputType>() else {
        tracing::warn!("unsupported output type {raw}, default {fallback} will be used");
        return fallback;
    };
    if is_output_supported(tool, output) {
        return output;
    }
    tracing::warn!("unsupported output type {output} for tool {tool}, default {fallback} will be used");
    fallback
}

fn parse_additional_arguments(raw: &[String]) -> AgentResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            return Err(AgentError::BadArgument(format!(
                "additional argument {item:?} must look like key=value"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AgentError::BadArgument(format!(
                "additional argument {item:?} has an empty key"
            )));
        }
        out.insert(key.to_string(), value.trim().to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_logger::{EventLayer, EventLogger};
    use crate::testing::SharedBuffer;
    use crate::api::{Event, LogLevel};
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn base_args() -> AgentArgs {
        AgentArgs {
            target_container_id: "containerd://abc".to_string(),
            lang: "java".to_string(),
            output_type: "jfr".to_string(),
            profiling_tool: "jcmd".to_string(),
            ..AgentArgs::default()
        }
    }

    #[test]
    fn defaults_fill_blank_arguments() {
        let job = ProfilingJob::from_args(&base_args()).expect("job");
        assert_eq!(job.container_id, "abc");
        assert_eq!(job.container_runtime, ContainerRuntime::Containerd);
        assert_eq!(job.container_runtime_path, PathBuf::from("/run/containerd"));
        assert_eq!(job.duration, Duration::from_secs(60));
        assert_eq!(job.interval, job.duration);
        assert_eq!(job.iterations(), 1);
        assert_eq!(job.event, ProfilingEvent::Itimer);
        assert_eq!(job.compressor, Compressor::Gzip);
        assert_eq!(job.heap_dump_split_in_chunk_size, "50M");
        assert_eq!(job.node_heap_snapshot_signal, 12);
        assert_eq!(job.grace_period_ending, Duration::from_secs(300));
        assert!(uuid::Uuid::parse_str(&job.uid).is_ok());
    }

    #[test]
    fn multi_window_job_counts_iterations() {
        let args = AgentArgs {
            duration: "10s".to_string(),
            interval: "3s".to_string(),
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.iterations(), 3);
    }

    #[test]
    fn invalid_windows_are_bad_arguments() {
        for (duration, interval) in [("0s", ""), ("-1s", ""), ("10s", "20s"), ("ten", "")] {
            let args = AgentArgs {
                duration: duration.to_string(),
                interval: interval.to_string(),
                ..base_args()
            };
            assert!(
                matches!(ProfilingJob::from_args(&args), Err(AgentError::BadArgument(_))),
                "{duration}/{interval}"
            );
        }
    }

    #[test]
    fn closed_set_violations_fail() {
        let args = AgentArgs {
            lang: "fortran".to_string(),
            ..base_args()
        };
        assert!(matches!(
            ProfilingJob::from_args(&args),
            Err(AgentError::BadArgument(_))
        ));
        let args = AgentArgs {
            target_container_runtime: "docker".to_string(),
            ..base_args()
        };
        assert!(matches!(
            ProfilingJob::from_args(&args),
            Err(AgentError::UnsupportedRuntime(_))
        ));
        let args = AgentArgs {
            target_container_id: String::new(),
            ..base_args()
        };
        assert!(matches!(
            ProfilingJob::from_args(&args),
            Err(AgentError::BadArgument(_))
        ));
    }

    #[test]
    fn pid_override_allows_missing_container() {
        let args = AgentArgs {
            target_container_id: String::new(),
            pid: "1000".to_string(),
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.pid.as_deref(), Some("1000"));
    }

    #[test]
    fn unsupported_output_downgrades_with_warning() {
        let buf = SharedBuffer::default();
        let logger = Arc::new(EventLogger::with_writer(Box::new(buf.clone()), true));
        let subscriber = tracing_subscriber::registry().with(EventLayer::new(logger));
        let args = AgentArgs {
            output_type: "flamegraph".to_string(),
            ..base_args()
        };
        let job = tracing::subscriber::with_default(subscriber, || {
            ProfilingJob::from_args(&args).expect("job")
        });
        assert_eq!(job.tool, ProfilingTool::Jcmd);
        assert_eq!(job.output_type, OutputType::Jfr);
        let warned = buf.events().into_iter().any(|e| match e {
            Event::Log(log) => {
                log.level == LogLevel::Warn
                    && log.msg == "unsupported output type flamegraph for tool jcmd, default jfr will be used"
            }
            _ => false,
        });
        assert!(warned);
    }

    #[test]
    fn tool_is_derived_or_downgraded_per_language() {
        let args = AgentArgs {
            profiling_tool: String::new(),
            output_type: "heapdump".to_string(),
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.tool, ProfilingTool::Jcmd);
        assert_eq!(job.output_type, OutputType::HeapDump);

        let args = AgentArgs {
            lang: "python".to_string(),
            profiling_tool: "rbspy".to_string(),
            output_type: "flamegraph".to_string(),
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.tool, ProfilingTool::Pyspy);

        let args = AgentArgs {
            profiling_tool: "gdb".to_string(),
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.tool, ProfilingTool::AsyncProfiler);
        assert_eq!(job.output_type, OutputType::Jfr);
    }

    #[test]
    fn unknown_or_blank_output_falls_back_to_tool_default() {
        let buf = SharedBuffer::default();
        let logger = Arc::new(EventLogger::with_writer(Box::new(buf.clone()), true));
        let subscriber = tracing_subscriber::registry().with(EventLayer::new(logger));
        let (unknown, blank) = tracing::subscriber::with_default(subscriber, || {
            let unknown = ProfilingJob::from_args(&AgentArgs {
                output_type: "pdf".to_string(),
                ..base_args()
            })
            .expect("unknown output");
            let blank = ProfilingJob::from_args(&AgentArgs {
                lang: "python".to_string(),
                profiling_tool: String::new(),
                output_type: String::new(),
                ..base_args()
            })
            .expect("blank output");
            (unknown, blank)
        });
        assert_eq!(unknown.tool, ProfilingTool::Jcmd);
        assert_eq!(unknown.output_type, OutputType::Jfr);
        assert_eq!((blank.tool, blank.output_type), (ProfilingTool::Pyspy, OutputType::Flamegraph));

        let messages: Vec<String> = buf
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(log) if log.level == LogLevel::Warn => Some(log.msg),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"unsupported output type pdf, default jfr will be used".to_string()));
        assert!(messages.contains(&"default output type flamegraph will be used".to_string()));
    }

    #[test]
    fn additional_arguments_are_key_value_pairs() {
        let args = AgentArgs {
            additional_arguments: vec![
                "flamegraph-width-in-pixels=1200".to_string(),
                "jfr-settings = /opt/custom.jfc".to_string(),
            ],
            ..base_args()
        };
        let job = ProfilingJob::from_args(&args).expect("job");
        assert_eq!(job.additional_argument("flamegraph-width-in-pixels"), Some("1200"));
        assert_eq!(job.additional_argument("jfr-settings"), Some("/opt/custom.jfc"));
        assert_eq!(job.additional_argument("missing"), None);

        let args = AgentArgs {
            additional_arguments: vec!["novalue".to_string()],
            ..base_args()
        };
        assert!(matches!(
            ProfilingJob::from_args(&args),
            Err(AgentError::BadArgument(_))
        ));
    }
}
