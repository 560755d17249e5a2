use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use podprof_agent::api::LogLevel;
use podprof_agent::exec::SystemExecutor;
use podprof_agent::profiler::{ProfilerContext, profiler_for};
use podprof_agent::{
    Agent, AgentArgs, AgentConfig, DEFAULT_CONFIG_PATH, EventLayer, EventLogger, ProfilingJob,
    exit_code, run_agent,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Profiles processes of a Kubernetes container and streams the results as
/// JSON events on stdout.
#[derive(Parser)]
#[command(name = "podprof-agent", version, about)]
struct Cli {
    #[command(flatten)]
    args: AgentArgs,

    /// Optional TOML file overriding tool paths and tunables.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbosity of the diagnostics written to stderr.
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logger = Arc::new(EventLogger::stdout(cli.args.print_logs));
    let filter = EnvFilter::try_new(cli.log_level.as_str())
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .with(EventLayer::new(logger.clone()))
        .init();

    let config = Arc::new(AgentConfig::load_optional(&cli.config));

    let job = match ProfilingJob::from_args(&cli.args) {
        Ok(job) => job,
        Err(err) => {
            if let Err(emit) = logger.error(err.to_string()) {
                tracing::error!("could not report failure: {emit}");
            }
            std::process::exit(1);
        }
    };
    tracing::debug!("profiling job: {job:?}");

    let ctx = ProfilerContext::new(config, Arc::new(SystemExecutor::new()), logger.clone());
    let profiler = profiler_for(job.tool, ctx);
    let agent = Arc::new(Agent::new(job, profiler, logger));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = rt.block_on(run_agent(agent, shutdown_signal()));
    if let Err(err) = &result {
        tracing::error!("profiling failed: {err}");
    }
    std::process::exit(exit_code(&result));
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(err) => {
            tracing::warn!("could not register SIGTERM handler: {err}");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::debug!("received SIGINT"),
        _ = terminate => tracing::debug!("received SIGTERM"),
    }
}
