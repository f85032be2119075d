//! Per-partition retry loop.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::MapReduceOptions;
use crate::agent::{FailureCode, TaskExecutionError, TaskOutcome, Worker, WorkerFailure};

/// How often and how patiently a worker retries its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub task_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `retry_delay * retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_delay.saturating_mul(retry)
    }
}

impl From<&MapReduceOptions> for RetryPolicy {
    fn from(options: &MapReduceOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
            task_timeout: options.task_timeout,
        }
    }
}

/// Run `input` on `worker` until it succeeds, attempts run out, or `cancel` fires.
///
/// Never fails: exhaustion and cancellation come back as a `Failure` outcome
/// carrying the last error and the number of attempts made.
pub async fn execute_with_retry(
    worker: &Worker,
    input: Value,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> TaskOutcome {
    let attempts = policy.attempts();
    let mut last_error = TaskExecutionError::new(FailureCode::Task, "no attempt was made");

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = policy.backoff(attempt - 1);
            tokio::select! {
                _ = cancel.cancelled() => return cancelled(worker, attempt - 1),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(worker, attempt),
            outcome = worker.execute_with_timeout(input.clone(), policy.task_timeout) => outcome,
        };

        match outcome {
            Ok(TaskOutcome::Failure(failure)) => {
                tracing::warn!(
                    "Worker {} attempt {}/{} failed: {}",
                    worker.id(),
                    attempt,
                    attempts,
                    failure.error
                );
                last_error = failure.error;
            }
            Ok(success) => return success,
            Err(e) => {
                // Destroyed under us; further attempts cannot run.
                return TaskOutcome::Failure(WorkerFailure {
                    worker: worker.id().clone(),
                    partition: None,
                    error: TaskExecutionError::new(FailureCode::Cancelled, e.to_string()),
                    attempts: attempt,
                });
            }
        }
    }

    TaskOutcome::Failure(WorkerFailure {
        worker: worker.id().clone(),
        partition: None,
        error: last_error,
        attempts,
    })
}

fn cancelled(worker: &Worker, attempts: u32) -> TaskOutcome {
    tracing::debug!("Worker {} stopped by cancellation", worker.id());
    worker.interrupt("job cancelled");
    TaskOutcome::Failure(WorkerFailure {
        worker: worker.id().clone(),
        partition: None,
        error: TaskExecutionError::new(FailureCode::Cancelled, "job cancelled"),
        attempts,
    })
}
