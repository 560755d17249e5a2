use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Profiler;
use crate::job::ProfilingJob;
use crate::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStage {
    SetUp,
    Invoke,
    CleanUp,
}

/// Profiler that launches nothing; it counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct FakeProfiler {
    set_ups: AtomicUsize,
    invokes: AtomicUsize,
    clean_ups: AtomicUsize,
    fail_at: Option<FakeStage>,
    invoke_time: Duration,
}

impl FakeProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(mut self, stage: FakeStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Each `invoke` sleeps this long before reporting.
    pub fn taking(mut self, time: Duration) -> Self {
        self.invoke_time = time;
        self
    }

    pub fn set_up_calls(&self) -> usize {
        self.set_ups.load(Ordering::SeqCst)
    }

    pub fn invoke_calls(&self) -> usize {
        self.invokes.load(Ordering::SeqCst)
    }

    pub fn clean_up_calls(&self) -> usize {
        self.clean_ups.load(Ordering::SeqCst)
    }

    fn outcome(&self, stage: FakeStage) -> AgentResult<()> {
        if self.fail_at == Some(stage) {
            return Err(AgentError::profiler_failure(
                "fake",
                Some(1),
                format!("fake failure in {stage:?}").as_bytes(),
            ));
        }
        Ok(())
    }
}

impl Profiler for FakeProfiler {
    fn set_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        self.set_ups.fetch_add(1, Ordering::SeqCst);
        self.outcome(FakeStage::SetUp)
    }

    fn invoke(&self, job: &ProfilingJob) -> AgentResult<Duration> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("fake iteration {} of job {}", job.iteration, job.uid);
        if !self.invoke_time.is_zero() {
            std::thread::sleep(self.invoke_time);
        }
        self.outcome(FakeStage::Invoke)?;
        Ok(self.invoke_time)
    }

    fn clean_up(&self, _job: &ProfilingJob) -> AgentResult<()> {
        self.clean_ups.fetch_add(1, Ordering::SeqCst);
        self.outcome(FakeStage::CleanUp)
    }
}
