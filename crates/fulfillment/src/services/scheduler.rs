//! Job scheduler trait and a recording implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::FulfillmentError;
use crate::jobs::Job;

/// Enqueues jobs on an at-least-once queue.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedules a job, optionally after a delay.
    async fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), FulfillmentError>;
}

/// A job that was handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job: Job,
    pub delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct RecordingState {
    jobs: Vec<ScheduledJob>,
    fail_on_schedule: bool,
    /// Schedule calls left before failures start.
    fail_after: Option<usize>,
}

/// Scheduler that records jobs instead of running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following schedule call fail. Clears `fail_after`.
    pub async fn set_fail_on_schedule(&self, fail: bool) {
        let mut state = self.state.lock().await;
        state.fail_on_schedule = fail;
        state.fail_after = None;
    }

    /// Accepts the next `accepted` jobs, then fails every call after them.
    pub async fn fail_after(&self, accepted: usize) {
        self.state.lock().await.fail_after = Some(accepted);
    }

    /// Returns every scheduled job, oldest first.
    pub async fn scheduled(&self) -> Vec<ScheduledJob> {
        self.state.lock().await.jobs.clone()
    }

    /// Removes and returns every scheduled job.
    pub async fn drain(&self) -> Vec<ScheduledJob> {
        std::mem::take(&mut self.state.lock().await.jobs)
    }

    /// Returns how many scheduled jobs have the given name.
    pub async fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|scheduled| scheduled.job.name() == name)
            .count()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), FulfillmentError> {
        let mut state = self.state.lock().await;
        let exhausted = match state.fail_after.as_mut() {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        if state.fail_on_schedule || exhausted {
            return Err(FulfillmentError::Scheduling(format!("queue rejected {job}")));
        }
        state.jobs.push(ScheduledJob { job, delay });
        Ok(())
    }
}
