use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use podprof_agent::api::{Event, OutputType, ProfilingTool, Stage};
use podprof_agent::exec::CommandOutput;
use podprof_agent::profiler::{FakeProfiler, ProfilerContext, profiler_for};
use podprof_agent::testing::{ScriptedExecutor, SharedBuffer};
use podprof_agent::{
    Agent, AgentArgs, AgentConfig, EventLayer, EventLogger, Outcome, ProfilingJob, exit_code,
    run_agent,
};
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("podprof-it-{name}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

/// containerd state for container `abc` whose init process is `pid`.
fn containerd_state(root: &Path, pid: &str) -> PathBuf {
    let state = root.join("containerd");
    let bundle = state.join("io.containerd.runtime.v2.task/k8s.io/abc");
    std::fs::create_dir_all(bundle.join("rootfs")).expect("bundle");
    std::fs::write(bundle.join("init.pid"), pid).expect("init.pid");
    std::fs::write(bundle.join("config.json"), r#"{"process":{"cwd":"/"}}"#).expect("config");
    state
}

fn args(lang: &str, tool: &str, output: &str) -> AgentArgs {
    AgentArgs {
        target_container_id: "containerd://abc".to_string(),
        lang: lang.to_string(),
        profiling_tool: tool.to_string(),
        output_type: output.to_string(),
        compressor_type: "none".to_string(),
        ..AgentArgs::default()
    }
}

fn logger() -> (Arc<EventLogger>, SharedBuffer) {
    let out = SharedBuffer::default();
    (Arc::new(EventLogger::with_writer(Box::new(out.clone()), true)), out)
}

#[test]
fn kernel_tracing_profiles_every_pid_in_every_iteration() {
    let root = temp_dir("btf");
    let tmp = root.join("agent-tmp");
    std::fs::create_dir_all(&tmp).expect("tmp");
    let state = containerd_state(&root, "1");

    let exec = Arc::new(ScriptedExecutor::new());
    exec.on_stdout("--ppid 1 ", "1000\n2000\n");
    exec.on_stdout("profile -f -U -F 99 -p 1000", "main;loop;work 120\nmain;idle 4\n");
    exec.on_stdout("profile -f -U -F 99 -p 2000", "main;serve;read 80\n");
    exec.on("flamegraph.pl", |spec| {
        let folded = std::fs::read_to_string(spec.stdin.as_ref().expect("stdin")).expect("raw");
        CommandOutput::ok(format!("<svg><!-- {} --></svg>", folded.lines().count()))
    });

    let config = AgentConfig {
        tmp_dir: tmp.clone(),
        submission_delay_ms: 0,
        ..AgentConfig::default()
    };
    let (logger, out) = logger();
    let ctx = ProfilerContext::new(Arc::new(config), exec.clone(), logger.clone());

    let mut args = args("go", "btf", "flamegraph");
    args.target_container_runtime_path = state.to_string_lossy().to_string();
    args.duration = "2s".to_string();
    args.interval = "1s".to_string();
    let job = ProfilingJob::from_args(&args).expect("job");
    assert_eq!(job.container_id, "abc");
    assert_eq!(job.iterations(), 2);

    let agent = Agent::new(job.clone(), profiler_for(job.tool, ctx), logger);
    let started = Instant::now();
    agent.run_pipeline().expect("pipeline");
    assert!(started.elapsed() >= Duration::from_secs(2));

    let events = out.events();
    assert!(matches!(events.first(), Some(Event::Progress(p)) if p.stage == Stage::Started));
    assert!(matches!(events.last(), Some(Event::Progress(p)) if p.stage == Stage::Ended));
    let mut results: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::Result(r) => {
                assert_eq!(r.result_type, OutputType::Flamegraph);
                Path::new(&r.file).file_name().map(|n| n.to_string_lossy().to_string())
            }
            _ => None,
        })
        .collect();
    results.sort();
    assert_eq!(
        results,
        vec![
            "agent-flamegraph-1000-0.svg",
            "agent-flamegraph-1000-1.svg",
            "agent-flamegraph-2000-0.svg",
            "agent-flamegraph-2000-1.svg",
        ]
    );
    for pid in ["1000", "2000"] {
        for i in 0..2 {
            let raw = std::fs::read_to_string(tmp.join(format!("agent-raw-{pid}-{i}.txt")))
                .expect("raw stacks");
            assert!(raw.lines().all(|l| l.starts_with(&format!("process: {pid};"))));
        }
    }

    agent.clean_up();
    agent.clean_up();
    let leftovers: Vec<_> = std::fs::read_dir(&tmp)
        .expect("tmp")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("agent-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn unsupported_output_downgrades_with_a_warning() {
    let (logger, out) = logger();
    let subscriber = tracing_subscriber::registry().with(EventLayer::new(logger));
    let job = tracing::subscriber::with_default(subscriber, || {
        ProfilingJob::from_args(&args("java", "jcmd", "flamegraph"))
    })
    .expect("job");
    assert_eq!(job.tool, ProfilingTool::Jcmd);
    assert_eq!(job.output_type, OutputType::Jfr);

    let warned = out.events().into_iter().any(|e| match e {
        Event::Log(log) => {
            log.msg == "unsupported output type flamegraph for tool jcmd, default jfr will be used"
        }
        _ => false,
    });
    assert!(warned);
}

#[tokio::test]
async fn fake_job_runs_to_completion_and_exits_zero() {
    let mut args = args("fake", "fake", "flamegraph");
    args.grace_period_ending = "20ms".to_string();
    let job = ProfilingJob::from_args(&args).expect("job");
    let fake = Arc::new(FakeProfiler::new());
    let (logger, out) = logger();
    let agent = Arc::new(Agent::new(job, fake.clone(), logger));

    let result = run_agent(agent, std::future::pending()).await;
    assert_eq!(exit_code(&result), 0);
    assert_eq!(result.expect("run"), Outcome::Completed);
    assert_eq!(fake.clean_up_calls(), 1);

    let stages: Vec<Stage> = out
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(p.stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![Stage::Started, Stage::Ended]);
}

#[test]
fn invalid_arguments_are_rejected() {
    let mut bad_interval = args("go", "bpf", "flamegraph");
    bad_interval.duration = "1s".to_string();
    bad_interval.interval = "2s".to_string();
    assert!(ProfilingJob::from_args(&bad_interval).is_err());

    let mut bad_runtime = args("go", "bpf", "flamegraph");
    bad_runtime.target_container_runtime = "docker".to_string();
    assert!(ProfilingJob::from_args(&bad_runtime).is_err());

    assert!(ProfilingJob::from_args(&args("cobol", "", "flamegraph")).is_err());
}
