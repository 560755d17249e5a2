//! Agent lifecycle: announce, set up, iterate, then clean up exactly once.
//!
//! The profiling pipeline is blocking and runs on a dedicated thread. The
//! async side races it against the shutdown signal and, after a normal
//! completion, keeps the agent alive for the grace period so the client can
//! copy artifacts out before residue is purged.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::api::Stage;
use crate::event_logger::EventLogger;
use crate::job::ProfilingJob;
use crate::profiler::Profiler;
use crate::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every iteration ran; cleanup happened on signal or grace expiry.
    Completed,
    /// A shutdown signal arrived while profiling.
    Aborted,
}

/// Process exit status for a finished run: signals and grace expiry are
/// normal endings, only pipeline failures are not.
pub fn exit_code(result: &AgentResult<Outcome>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

pub struct Agent {
    job: ProfilingJob,
    profiler: Arc<dyn Profiler>,
    logger: Arc<EventLogger>,
    stopping: AtomicBool,
    cleaned: Once,
}

impl Agent {
    pub fn new(job: ProfilingJob, profiler: Arc<dyn Profiler>, logger: Arc<EventLogger>) -> Self {
        Self {
            job,
            profiler,
            logger,
            stopping: AtomicBool::new(false),
            cleaned: Once::new(),
        }
    }

    /// Emits `started`, sets the profiler up and runs every iteration,
    /// padding short iterations up to the interval. `ended` is emitted only
    /// when the loop was not interrupted.
    pub fn run_pipeline(&self) -> AgentResult<()> {
        self.logger.progress(Stage::Started)?;
        self.profiler.set_up(&self.job)?;

        let iterations = self.job.iterations();
        let mut job = self.job.clone();
        for i in 0..iterations {
            if self.is_stopping() {
                tracing::debug!("stop requested before iteration {i}");
                return Ok(());
            }
            job.iteration = i;
            let elapsed = self.profiler.invoke(&job)?;
            tracing::debug!("iteration {i} of {iterations} took {elapsed:?}");
            if iterations > 1 && elapsed < job.interval {
                std::thread::sleep(job.interval - elapsed);
            }
        }

        if self.is_stopping() {
            return Ok(());
        }
        self.logger.progress(Stage::Ended)?;
        Ok(())
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Runs the profiler's cleanup the first time it is called; errors are
    /// only logged.
    pub fn clean_up(&self) {
        self.cleaned.call_once(|| {
            if let Err(err) = self.profiler.clean_up(&self.job) {
                tracing::warn!("cleanup failed: {err}");
            }
        });
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.is_completed()
    }
}

async fn clean_up_blocking(agent: &Arc<Agent>) {
    let agent = agent.clone();
    if let Err(err) = tokio::task::spawn_blocking(move || agent.clean_up()).await {
        tracing::warn!("cleanup task failed: {err}");
    }
}

/// Drives `agent` to completion.
///
/// A failing pipeline is reported as an `error` event, cleaned up and
/// returned. `shutdown` resolving while profiling aborts the run; after a
/// normal completion it ends the grace period early.
pub async fn run_agent<S>(agent: Arc<Agent>, shutdown: S) -> AgentResult<Outcome>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let worker = agent.clone();
    let mut pipeline = tokio::task::spawn_blocking(move || worker.run_pipeline());

    let finished = tokio::select! {
        joined = &mut pipeline => joined,
        _ = &mut shutdown => {
            tracing::debug!("shutdown requested while profiling");
            agent.request_stop();
            clean_up_blocking(&agent).await;
            return Ok(Outcome::Aborted);
        }
    };

    let result = match finished {
        Ok(result) => result,
        Err(join) => Err(AgentError::Io(std::io::Error::other(format!(
            "profiling pipeline panicked: {join}"
        )))),
    };
    if let Err(err) = result {
        if let Err(emit) = agent.logger.error(err.to_string()) {
            tracing::warn!("could not report failure: {emit}");
        }
        clean_up_blocking(&agent).await;
        return Err(err);
    }

    let grace: Duration = agent.job.grace_period_ending;
    tokio::select! {
        _ = tokio::time::sleep(grace) => {
            tracing::warn!("maximum allowed time surpassed, cleaning up before the agent is removed");
        }
        _ = &mut shutdown => {
            tracing::debug!("shutdown requested after profiling completed");
        }
    }
    clean_up_blocking(&agent).await;
    Ok(Outcome::Completed)
}
