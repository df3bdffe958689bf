//! In-process at-least-once job queue.
//!
//! [`QueueScheduler`] is the [`JobScheduler`] the saga enqueues onto, and
//! [`JobWorker`] drains the queue, running each delivery on its own task.
//! A delivery that returns an error is redelivered with exponential backoff
//! until the retry policy runs out. Delayed jobs live in sleeping tasks, so
//! they do not survive a restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_store::EventStore;
use fulfillment::{FulfillmentError, Job, JobContext, JobHandler, JobOutcome, JobScheduler};
use tokio::sync::{mpsc, watch};

use crate::config::Config;

/// A job with its delivery count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: Job,
    /// 1-based.
    pub attempt: u32,
}

impl Delivery {
    /// First delivery of a job.
    pub fn first(job: Job) -> Self {
        Self { job, attempt: 1 }
    }

    fn next(&self) -> Self {
        Self {
            job: self.job.clone(),
            attempt: self.attempt.saturating_add(1),
        }
    }
}

/// Creates a queue: the scheduler feeds the receiver a [`JobWorker`] runs on.
pub fn channel() -> (QueueScheduler, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueScheduler { tx }, rx)
}

/// Enqueues jobs onto the in-process queue.
#[derive(Debug, Clone)]
pub struct QueueScheduler {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl QueueScheduler {
    /// Enqueues a delivery, after `delay` when one is given.
    pub fn enqueue(&self, delivery: Delivery, delay: Option<Duration>) -> Result<(), FulfillmentError> {
        if self.tx.is_closed() {
            return Err(queue_closed());
        }

        match delay.filter(|d| !d.is_zero()) {
            None => self.tx.send(delivery).map_err(|_| queue_closed()),
            Some(delay) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = tx.send(delivery) {
                        tracing::warn!(job = %e.0.job, "queue closed before delayed job was due");
                    }
                });
                Ok(())
            }
        }
    }
}

#[async_trait]
impl JobScheduler for QueueScheduler {
    async fn schedule(&self, job: Job, delay: Option<Duration>) -> Result<(), FulfillmentError> {
        tracing::debug!(%job, ?delay, "job scheduled");
        metrics::counter!("jobs_scheduled_total", "job" => job.name()).increment(1);
        self.enqueue(Delivery::first(job), delay)
    }
}

fn queue_closed() -> FulfillmentError {
    FulfillmentError::Scheduling("job queue is closed".to_string())
}

/// How often and how patiently a failed job is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second delivery. Doubles after each further one.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Returns the delay before redelivering after `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1_u32 << doublings)
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.job_max_attempts,
            backoff: config.job_retry_backoff,
        }
    }
}

/// Runs queued jobs through a [`JobHandler`].
pub struct JobWorker<S: EventStore> {
    handler: Arc<JobHandler<S>>,
    scheduler: QueueScheduler,
    policy: RetryPolicy,
}

impl<S: EventStore + Clone + 'static> JobWorker<S> {
    /// Creates a worker that redelivers through `scheduler`.
    pub fn new(handler: Arc<JobHandler<S>>, scheduler: QueueScheduler, policy: RetryPolicy) -> Self {
        Self {
            handler,
            scheduler,
            policy,
        }
    }

    /// Runs one delivery and enqueues its redelivery if it failed.
    #[tracing::instrument(skip(self, delivery), fields(job = %delivery.job, attempt = delivery.attempt))]
    pub async fn deliver(&self, delivery: Delivery) -> Result<JobOutcome, FulfillmentError> {
        let ctx = JobContext {
            attempt: delivery.attempt,
            max_attempts: self.policy.max_attempts,
        };
        let result = self.handler.handle(&delivery.job, ctx).await;

        match &result {
            Ok(outcome) => {
                tracing::debug!(outcome = outcome.label(), "job done");
            }
            Err(e) if ctx.is_final_attempt() => {
                metrics::counter!("jobs_dropped_total", "job" => delivery.job.name()).increment(1);
                tracing::error!(error = %e, "job dropped after its final delivery");
            }
            Err(e) => {
                let delay = self.policy.delay_after(delivery.attempt);
                tracing::warn!(error = %e, ?delay, "job failed, redelivering");
                if let Err(e) = self.scheduler.enqueue(delivery.next(), Some(delay)) {
                    tracing::error!(error = %e, "redelivery not enqueued");
                }
            }
        }

        result
    }

    /// Drains the queue until it closes or `shutdown` flips.
    pub async fn run(
        self: Arc<Self>,
        mut queue: mpsc::UnboundedReceiver<Delivery>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            max_attempts = self.policy.max_attempts,
            backoff_ms = self.policy.backoff.as_millis() as u64,
            "job worker started"
        );

        loop {
            tokio::select! {
                delivery = queue.recv() => {
                    let Some(delivery) = delivery else {
                        break;
                    };
                    let worker = self.clone();
                    tokio::spawn(async move {
                        // Errors are logged and redelivered inside deliver.
                        worker.deliver(delivery).await.ok();
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("job worker stopped");
    }
}
