//! Agent lifecycle: task execution contract for workers, result collection for masters.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;

use crate::error::{Error, Result};
use crate::events::{EventBus, FabricEvent};
use crate::registry::{AgentId, AgentIdentity, AgentRegistry, AgentStatus, Capability};

/// Caller logic bound to a worker. Opaque to the fabric.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, input: Value) -> anyhow::Result<Value>;
}

/// Closure-backed [`TaskHandler`].
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a task handler.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The task function returned an error.
    Task,
    Timeout,
    Panicked,
    /// Input or output could not be converted.
    Codec,
    Cancelled,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Task => write!(f, "task"),
            FailureCode::Timeout => write!(f, "timeout"),
            FailureCode::Panicked => write!(f, "panicked"),
            FailureCode::Codec => write!(f, "codec"),
            FailureCode::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A task failure, captured into the worker's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionError {
    pub code: FailureCode,
    pub message: String,
}

impl TaskExecutionError {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureCode::Timeout,
            format!("task exceeded timeout of {}ms", limit.as_millis()),
        )
    }
}

impl std::fmt::Display for TaskExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for TaskExecutionError {}

/// A worker that did not produce a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: AgentId,
    /// Partition index, when the failure came from a map-reduce dispatch.
    pub partition: Option<usize>,
    pub error: TaskExecutionError,
    pub attempts: u32,
}

/// Result of one `Worker::execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        result: Value,
        duration_ms: u64,
        worker: AgentId,
    },
    Failure(WorkerFailure),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    pub fn worker(&self) -> &AgentId {
        match self {
            TaskOutcome::Success { worker, .. } => worker,
            TaskOutcome::Failure(failure) => &failure.worker,
        }
    }

    /// The task's value, or its captured error.
    pub fn into_result(self) -> Result<Value> {
        match self {
            TaskOutcome::Success { result, .. } => Ok(result),
            TaskOutcome::Failure(failure) => Err(failure.error.into()),
        }
    }

    pub(crate) fn failure(worker: &AgentId, error: TaskExecutionError) -> Self {
        TaskOutcome::Failure(WorkerFailure {
            worker: worker.clone(),
            partition: None,
            error,
            attempts: 1,
        })
    }
}

/// Worker execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Completed,
    Error,
    Destroyed,
}

/// An agent bound to one task function, child of exactly one master.
pub struct Worker {
    identity: AgentIdentity,
    master_id: AgentId,
    task: Arc<dyn TaskHandler>,
    status: Mutex<WorkerStatus>,
    /// Held for the whole of an execution; calls on one worker run serially.
    gate: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl Worker {
    pub(crate) fn new(identity: AgentIdentity, task: Arc<dyn TaskHandler>, events: EventBus) -> Self {
        let master_id = identity
            .parent_id
            .clone()
            .unwrap_or_else(|| identity.id.clone());
        Self {
            identity,
            master_id,
            task,
            status: Mutex::new(WorkerStatus::Idle),
            gate: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.identity.id
    }

    pub fn master_id(&self) -> &AgentId {
        &self.master_id
    }

    pub fn identity(&self) -> AgentIdentity {
        let mut identity = self.identity.clone();
        if self.is_destroyed() {
            identity.status = AgentStatus::Destroyed;
        }
        identity
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.status() == WorkerStatus::Destroyed
    }

    /// Run the bound task on `input`.
    ///
    /// Task failures are captured in the returned outcome; the only error is
    /// [`Error::UnknownAgent`] when the worker has been destroyed.
    pub async fn execute(&self, input: Value) -> Result<TaskOutcome> {
        self.execute_with_timeout(input, None).await
    }

    /// Like [`Worker::execute`], failing the attempt with a timeout once `limit` elapses.
    pub async fn execute_with_timeout(
        &self,
        input: Value,
        limit: Option<Duration>,
    ) -> Result<TaskOutcome> {
        let _gate = self.gate.lock().await;
        {
            let mut status = self.status.lock();
            if *status == WorkerStatus::Destroyed {
                return Err(Error::UnknownAgent(self.id().clone()));
            }
            *status = WorkerStatus::Running;
        }
        self.events.publish(FabricEvent::AgentStarted {
            agent_id: self.id().clone(),
        });

        let started = Instant::now();
        let task = self.task.clone();
        // The task runs on its own tokio task so a panic is caught as a JoinError;
        // dropping the handle (timeout, cancellation) aborts it.
        let handle = AbortOnDropHandle::new(tokio::spawn(async move { task.run(input).await }));
        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => Some(joined),
                Err(_) => None,
            },
            None => Some(handle.await),
        };

        let result = match joined {
            Some(Ok(Ok(value))) => Ok(value),
            Some(Ok(Err(e))) => Err(TaskExecutionError::new(FailureCode::Task, format!("{:#}", e))),
            Some(Err(join_error)) => Err(TaskExecutionError::new(
                FailureCode::Panicked,
                join_error.to_string(),
            )),
            None => Err(TaskExecutionError::timeout(limit.unwrap_or_default())),
        };
        let duration = started.elapsed();

        match result {
            Ok(result) => {
                self.transition(WorkerStatus::Completed);
                self.events.publish(FabricEvent::AgentCompleted {
                    agent_id: self.id().clone(),
                    duration_ms: duration.as_millis() as u64,
                });
                Ok(TaskOutcome::Success {
                    result,
                    duration_ms: duration.as_millis() as u64,
                    worker: self.id().clone(),
                })
            }
            Err(error) => {
                self.transition(WorkerStatus::Error);
                tracing::debug!("Worker {} task failed: {}", self.id(), error);
                self.events.publish(FabricEvent::AgentError {
                    agent_id: self.id().clone(),
                    error: error.to_string(),
                });
                Ok(TaskOutcome::failure(self.id(), error))
            }
        }
    }

    /// Destruction wins over any state an in-flight execution reports.
    fn transition(&self, next: WorkerStatus) {
        let mut status = self.status.lock();
        if *status != WorkerStatus::Destroyed {
            *status = next;
        }
    }

    /// Move a worker whose execution was dropped mid-run from running to error.
    pub(crate) fn interrupt(&self, reason: &str) {
        {
            let mut status = self.status.lock();
            if *status != WorkerStatus::Running {
                return;
            }
            *status = WorkerStatus::Error;
        }
        self.events.publish(FabricEvent::AgentError {
            agent_id: self.id().clone(),
            error: reason.to_string(),
        });
    }

    pub(crate) fn mark_destroyed(&self) {
        *self.status.lock() = WorkerStatus::Destroyed;
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", self.id())
            .field("master_id", &self.master_id)
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Default)]
struct MasterState {
    workers: Vec<AgentId>,
    results: Vec<Option<TaskOutcome>>,
}

/// An agent owning a pool of workers and the ordered results they report.
pub struct Master {
    identity: AgentIdentity,
    state: Mutex<MasterState>,
    destroyed: AtomicBool,
}

impl Master {
    pub(crate) fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            state: Mutex::new(MasterState::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.identity.id
    }

    pub fn identity(&self) -> AgentIdentity {
        let mut identity = self.identity.clone();
        if self.is_destroyed() {
            identity.status = AgentStatus::Destroyed;
        }
        identity
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Owned worker ids, in creation order.
    pub fn worker_ids(&self) -> Vec<AgentId> {
        self.state.lock().workers.clone()
    }

    /// Create `count` workers bound to `task` and reset the result slots to `count`.
    ///
    /// Slot `i` belongs to the `i`-th returned worker.
    pub fn spawn(
        &self,
        registry: &AgentRegistry,
        count: usize,
        task: Arc<dyn TaskHandler>,
    ) -> Result<Vec<Arc<Worker>>> {
        if self.is_destroyed() {
            return Err(Error::UnknownAgent(self.id().clone()));
        }
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let name = format!("{}-worker-{}", self.identity.name, index);
            workers.push(registry.create_worker(
                self.id(),
                name,
                task.clone(),
                [Capability::Messaging],
            )?);
        }
        self.state.lock().results = vec![None; count];
        tracing::debug!("Master {} spawned {} workers", self.id(), count);
        Ok(workers)
    }

    /// Record the outcome for dispatch slot `index`.
    ///
    /// Returns `false` when the slot is out of range or already holds an outcome;
    /// the first completion wins.
    pub fn record(&self, index: usize, outcome: TaskOutcome) -> bool {
        let mut state = self.state.lock();
        match state.results.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(outcome);
                true
            }
            Some(Some(_)) => {
                tracing::warn!(
                    "Master {} ignored duplicate completion for slot {}",
                    self.id(),
                    index
                );
                false
            }
            None => false,
        }
    }

    /// Outcomes by dispatch index; `None` for slots still outstanding.
    pub fn results(&self) -> Vec<Option<TaskOutcome>> {
        self.state.lock().results.clone()
    }

    /// Remove this master (and, by cascade, its workers) from the registry.
    pub fn destroy(&self, registry: &AgentRegistry) -> bool {
        registry.destroy(self.id())
    }

    pub(crate) fn adopt(&self, worker: AgentId) {
        self.state.lock().workers.push(worker);
    }

    pub(crate) fn disown(&self, worker: &AgentId) {
        self.state.lock().workers.retain(|w| w != worker);
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("id", self.id())
            .field("workers", &self.worker_ids())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
