//! MapReduce orchestration over masters and workers.
//!
//! A job gets its own master. The input is partitioned, one worker is spawned per
//! partition, and each worker runs the map function with retries. Workers report
//! their outcome to the master over the message bus; the master slots reports by
//! partition index, so the reduce step sees results in input order no matter which
//! worker finished first. The job's agents are torn down on every exit path.

pub mod partition;
pub mod retry;

pub use partition::{Comparator, PartitionStrategy};
pub use retry::{execute_with_retry, RetryPolicy};

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use uuid::Uuid;

use crate::agent::{
    FailureCode, Master, TaskExecutionError, TaskHandler, TaskOutcome, Worker, WorkerFailure,
};
use crate::config::FabricConfig;
use crate::error::{Error, Result};
use crate::events::FabricEvent;
use crate::protocol::{Message, MessageBus, MessageFilter, MessageKind};
use crate::registry::{AgentId, AgentRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to compute: the input and how to spread it over workers.
pub struct MapReduceJob<T> {
    pub input: Vec<T>,
    pub num_workers: usize,
    pub strategy: PartitionStrategy,
    comparator: Option<Comparator<T>>,
}

impl<T> MapReduceJob<T> {
    pub fn new(input: Vec<T>, num_workers: usize) -> Self {
        Self {
            input,
            num_workers,
            strategy: PartitionStrategy::RoundRobin,
            comparator: None,
        }
    }

    pub fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Order used by [`PartitionStrategy::Range`].
    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(comparator));
        self
    }
}

impl<T: Ord + 'static> MapReduceJob<T> {
    /// Use `T`'s own ordering for range partitioning.
    pub fn natural_order(self) -> Self {
        self.with_comparator(|a: &T, b: &T| a.cmp(b))
    }
}

/// How to run a job.
#[derive(Debug, Clone)]
pub struct MapReduceOptions {
    /// Abort before reduce when any worker exhausted its retries.
    pub fail_on_error: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub task_timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl Default for MapReduceOptions {
    fn default() -> Self {
        Self {
            fail_on_error: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            task_timeout: None,
            cancellation: None,
        }
    }
}

impl MapReduceOptions {
    pub fn from_config(config: &FabricConfig) -> Self {
        Self {
            fail_on_error: config.fail_on_error,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            task_timeout: config.task_timeout(),
            cancellation: None,
        }
    }

    pub fn fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = Some(task_timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Summary of a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport<M, R> {
    pub job_id: JobId,
    pub success: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Worker ids by partition index.
    pub workers: Vec<AgentId>,
    /// Successful map results, by partition index.
    pub map_results: Vec<M>,
    /// Workers that exhausted their retries (only when `fail_on_error` is off).
    pub failures: Vec<WorkerFailure>,
    pub result: R,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Adapts a typed map function to the worker's JSON task contract.
struct MapTask<T, M, F> {
    map_fn: F,
    _types: PhantomData<fn(Vec<T>) -> M>,
}

#[async_trait]
impl<T, M, F, Fut> TaskHandler for MapTask<T, M, F>
where
    T: DeserializeOwned + Send,
    M: Serialize + Send,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<M>> + Send,
{
    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        let partition: Vec<T> = serde_json::from_value(input)
            .map_err(|e| anyhow::anyhow!("could not decode partition: {}", e))?;
        let output = (self.map_fn)(partition).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Worker-to-master report of one partition's outcome.
#[derive(Debug, Serialize, Deserialize)]
struct PartitionReport {
    partition: usize,
    outcome: TaskOutcome,
}

struct MapPhase<M> {
    workers: Vec<AgentId>,
    results: Vec<M>,
    failures: Vec<WorkerFailure>,
}

/// Runs map-reduce jobs against one registry and bus.
#[derive(Clone)]
pub struct OrchestrationEngine {
    registry: AgentRegistry,
    bus: MessageBus,
    config: FabricConfig,
}

impl OrchestrationEngine {
    pub fn new(registry: AgentRegistry, bus: MessageBus) -> Self {
        Self {
            registry,
            bus,
            config: FabricConfig::default(),
        }
    }

    /// Build a registry and bus sized and timed by `config`.
    pub fn from_config(config: FabricConfig) -> Self {
        let registry = AgentRegistry::new(config.event_capacity);
        let bus = MessageBus::from_config(registry.clone(), &config);
        Self {
            registry,
            bus,
            config,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Options seeded from this engine's configuration.
    pub fn default_options(&self) -> MapReduceOptions {
        MapReduceOptions::from_config(&self.config)
    }

    /// Run one map-reduce job.
    ///
    /// Publishes `job:start` and then exactly one of `job:complete` or `job:error`.
    /// Map failures surface as [`Error::MapPhaseFailed`] when `fail_on_error` is
    /// set; a reduce failure is returned as [`Error::Reduce`] without wrapping.
    pub async fn map_reduce<T, M, R, MF, MFut, RF, RFut>(
        &self,
        job: MapReduceJob<T>,
        options: MapReduceOptions,
        map_fn: MF,
        reduce_fn: RF,
    ) -> Result<JobReport<M, R>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        M: DeserializeOwned + Serialize + Clone + Send + 'static,
        MF: Fn(Vec<T>) -> MFut + Send + Sync + 'static,
        MFut: Future<Output = anyhow::Result<M>> + Send + 'static,
        RF: FnOnce(Vec<M>) -> RFut,
        RFut: Future<Output = anyhow::Result<R>>,
    {
        let job_id = JobId::new();
        let started = Instant::now();
        let events = self.registry.events().clone();

        events.publish(FabricEvent::JobStart {
            job_id,
            input_len: job.input.len(),
            num_workers: job.num_workers,
            strategy: job.strategy,
        });
        tracing::info!(
            "Job {} started: {} items over {} workers ({})",
            job_id,
            job.input.len(),
            job.num_workers,
            job.strategy
        );

        let master = self.registry.create_master(format!("job-{}", job_id), []);
        let guard = JobGuard {
            job_id,
            registry: self.registry.clone(),
            master,
            finished: false,
        };
        let outcome = self
            .run_job(job_id, &guard.master, job, &options, map_fn, reduce_fn)
            .await;
        guard.finish();

        let duration = started.elapsed();
        match outcome {
            Ok((phase, result)) => {
                events.publish(FabricEvent::JobComplete {
                    job_id,
                    duration_ms: duration.as_millis() as u64,
                });
                tracing::info!("Job {} completed in {}ms", job_id, duration.as_millis());
                Ok(JobReport {
                    job_id,
                    success: true,
                    duration,
                    workers: phase.workers,
                    map_results: phase.results,
                    failures: phase.failures,
                    result,
                })
            }
            Err(e) => {
                events.publish(FabricEvent::JobError {
                    job_id,
                    error: e.to_string(),
                });
                tracing::error!("Job {} failed: {}", job_id, e);
                Err(e)
            }
        }
    }

    async fn run_job<T, M, R, MF, MFut, RF, RFut>(
        &self,
        job_id: JobId,
        master: &Arc<Master>,
        job: MapReduceJob<T>,
        options: &MapReduceOptions,
        map_fn: MF,
        reduce_fn: RF,
    ) -> Result<(MapPhase<M>, R)>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        M: DeserializeOwned + Serialize + Clone + Send + 'static,
        MF: Fn(Vec<T>) -> MFut + Send + Sync + 'static,
        MFut: Future<Output = anyhow::Result<M>> + Send + 'static,
        RF: FnOnce(Vec<M>) -> RFut,
        RFut: Future<Output = anyhow::Result<R>>,
    {
        let MapReduceJob {
            input,
            num_workers,
            strategy,
            comparator,
        } = job;

        let partitions = partition::partition(input, num_workers, strategy, comparator.as_ref())?;
        self.registry.events().publish(FabricEvent::JobPartition {
            job_id,
            sizes: partitions.iter().map(Vec::len).collect(),
        });
        let payloads = partitions
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<Value>, _>>()?;

        let task: Arc<dyn TaskHandler> = Arc::new(MapTask {
            map_fn,
            _types: PhantomData::<fn(Vec<T>) -> M>,
        });
        let workers = master.spawn(&self.registry, num_workers, task)?;
        let owners: Vec<AgentId> = workers.iter().map(|w| w.id().clone()).collect();
        self.collect_reports(master, owners)?;

        let phase = self.map_phase(job_id, master, &workers, payloads, options).await?;
        if !phase.failures.is_empty() && options.fail_on_error {
            for failure in &phase.failures {
                tracing::warn!(
                    "Job {} partition {:?} failed on {} after {} attempts: {}",
                    job_id,
                    failure.partition,
                    failure.worker,
                    failure.attempts,
                    failure.error
                );
            }
            return Err(Error::MapPhaseFailed {
                failed: phase.failures.len(),
                failures: phase.failures,
            });
        }

        self.registry.events().publish(FabricEvent::ReduceStart {
            job_id,
            inputs: phase.results.len(),
        });
        let result = reduce_fn(phase.results.clone())
            .await
            .map_err(Error::Reduce)?;
        self.registry
            .events()
            .publish(FabricEvent::ReduceComplete { job_id });

        Ok((phase, result))
    }

    /// Route partition reports sent to the master into its result slots.
    ///
    /// `owners[i]` is the worker dispatched partition `i`, fixed at spawn time.
    fn collect_reports(&self, master: &Arc<Master>, owners: Vec<AgentId>) -> Result<()> {
        let sink = master.clone();
        self.bus
            .subscribe(master.id(), MessageFilter::default(), move |message: &Message| {
                if &message.to != sink.id() {
                    return;
                }
                let payload = match &message.kind {
                    MessageKind::Direct { payload } => payload,
                    _ => return,
                };
                let report: PartitionReport = match serde_json::from_value(payload.clone()) {
                    Ok(report) => report,
                    Err(_) => return,
                };
                let owned = owners
                    .get(report.partition)
                    .map_or(false, |id| id == &message.from);
                if !owned || report.outcome.worker() != &message.from {
                    tracing::warn!(
                        "Master {} ignored report for partition {} from {}",
                        sink.id(),
                        report.partition,
                        message.from
                    );
                    return;
                }
                sink.record(report.partition, report.outcome);
            })?;
        Ok(())
    }

    async fn map_phase<M>(
        &self,
        job_id: JobId,
        master: &Arc<Master>,
        workers: &[Arc<Worker>],
        payloads: Vec<Value>,
        options: &MapReduceOptions,
    ) -> Result<MapPhase<M>>
    where
        M: DeserializeOwned,
    {
        let worker_ids: Vec<AgentId> = workers.iter().map(|w| w.id().clone()).collect();
        self.registry.events().publish(FabricEvent::MapStart {
            job_id,
            workers: worker_ids.clone(),
        });

        let cancel = options.cancellation.clone().unwrap_or_default();
        let policy = RetryPolicy::from(options);

        let mut dispatched = Vec::with_capacity(workers.len());
        for (index, (worker, input)) in workers.iter().cloned().zip(payloads).enumerate() {
            let bus = self.bus.clone();
            let policy = policy.clone();
            let cancel = cancel.clone();
            dispatched.push(AbortOnDropHandle::new(tokio::spawn(async move {
                let mut outcome = execute_with_retry(&worker, input, &policy, &cancel).await;
                if let TaskOutcome::Failure(failure) = &mut outcome {
                    failure.partition = Some(index);
                }
                report(&bus, &worker, index, outcome);
            })));
        }

        for (index, handle) in dispatched.into_iter().enumerate() {
            if let Err(join_error) = handle.await {
                master.record(
                    index,
                    TaskOutcome::Failure(WorkerFailure {
                        worker: worker_ids[index].clone(),
                        partition: Some(index),
                        error: TaskExecutionError::new(FailureCode::Panicked, join_error.to_string()),
                        attempts: 0,
                    }),
                );
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("Job {} cancelled during map phase", job_id);
            return Err(Error::Cancelled(job_id));
        }

        let mut results = Vec::with_capacity(workers.len());
        let mut failures = Vec::new();
        for (index, slot) in master.results().into_iter().enumerate() {
            match slot {
                Some(TaskOutcome::Success { result, worker, .. }) => {
                    match serde_json::from_value::<M>(result) {
                        Ok(value) => results.push(value),
                        Err(e) => failures.push(WorkerFailure {
                            worker,
                            partition: Some(index),
                            error: TaskExecutionError::new(
                                FailureCode::Codec,
                                format!("could not decode map result: {}", e),
                            ),
                            attempts: 1,
                        }),
                    }
                }
                Some(TaskOutcome::Failure(failure)) => failures.push(failure),
                None => failures.push(WorkerFailure {
                    worker: worker_ids[index].clone(),
                    partition: Some(index),
                    error: TaskExecutionError::new(FailureCode::Task, "no report reached the master"),
                    attempts: 0,
                }),
            }
        }

        self.registry.events().publish(FabricEvent::MapComplete {
            job_id,
            succeeded: results.len(),
            failed: failures.len(),
        });
        tracing::info!(
            "Job {} map phase done: {} succeeded, {} failed",
            job_id,
            results.len(),
            failures.len()
        );

        Ok(MapPhase {
            workers: worker_ids,
            results,
            failures,
        })
    }
}

/// Owns a job's agents; tears them down however the job future ends.
struct JobGuard {
    job_id: JobId,
    registry: AgentRegistry,
    master: Arc<Master>,
    finished: bool,
}

impl JobGuard {
    /// Normal exit; the caller emits the terminal event.
    fn finish(mut self) {
        self.finished = true;
    }

    /// Destroy workers, then the master. Safe against already-destroyed agents.
    fn teardown(&self) {
        for worker in self.master.worker_ids() {
            self.registry.destroy(&worker);
        }
        self.master.destroy(&self.registry);
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.teardown();
        if !self.finished {
            tracing::warn!("Job {} dropped before completion", self.job_id);
            self.registry.events().publish(FabricEvent::JobError {
                job_id: self.job_id,
                error: "job dropped before completion".to_string(),
            });
        }
    }
}

/// Send a partition outcome from `worker` to its master.
fn report(bus: &MessageBus, worker: &Worker, partition: usize, outcome: TaskOutcome) {
    let payload = match serde_json::to_value(PartitionReport { partition, outcome }) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Worker {} could not encode its report: {}", worker.id(), e);
            return;
        }
    };
    let message = Message::direct(worker.id().clone(), worker.master_id().clone(), payload);
    if let Err(e) = bus.send(message) {
        tracing::warn!("Worker {} report not delivered: {}", worker.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> OrchestrationEngine {
        let registry = AgentRegistry::default();
        let bus = MessageBus::new(registry.clone());
        OrchestrationEngine::new(registry, bus)
    }

    fn quick() -> MapReduceOptions {
        MapReduceOptions::default()
            .max_retries(0)
            .retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_zero_workers_fails_with_single_terminal_event() {
        crate::logging::init_test();
        let engine = engine();
        let mut events = engine.registry().events().subscribe();

        let err = engine
            .map_reduce(
                MapReduceJob::new(vec![1, 2, 3], 0),
                quick(),
                |items: Vec<i64>| async move { Ok(items.len()) },
                |counts: Vec<usize>| async move { Ok(counts.len()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names.first(), Some(&"job:start"));
        assert_eq!(names.iter().filter(|n| n.starts_with("job:") && **n != "job:start").count(), 1);
        assert_eq!(names.last(), Some(&"job:error"));
        assert_eq!(engine.registry().list().total, 0);
    }

    #[tokio::test]
    async fn test_range_without_comparator_is_rejected() {
        let engine = engine();
        let err = engine
            .map_reduce(
                MapReduceJob::new(vec![3, 1, 2], 2).with_strategy(PartitionStrategy::Range),
                quick(),
                |items: Vec<i64>| async move { Ok(items) },
                |parts: Vec<Vec<i64>>| async move { Ok(parts) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_range_with_natural_order() {
        let engine = engine();
        let report = engine
            .map_reduce(
                MapReduceJob::new(vec![5, 3, 1, 4, 2], 2)
                    .with_strategy(PartitionStrategy::Range)
                    .natural_order(),
                quick(),
                |items: Vec<i64>| async move { Ok(items) },
                |parts: Vec<Vec<i64>>| async move { Ok(parts.concat()) },
            )
            .await
            .unwrap();
        assert_eq!(report.map_results, vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(report.result, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_reports_travel_over_the_bus() {
        let engine = engine();
        let before = engine.bus().stats().sent;
        let report = engine
            .map_reduce(
                MapReduceJob::new(vec![1, 2, 3, 4], 2),
                quick(),
                |items: Vec<i64>| async move { Ok(items.iter().sum::<i64>()) },
                |sums: Vec<i64>| async move { Ok(sums.iter().sum::<i64>()) },
            )
            .await
            .unwrap();
        assert_eq!(report.result, 10);
        assert_eq!(engine.bus().stats().sent - before, 2);
        assert_eq!(engine.bus().stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn test_reduce_error_passes_through() {
        let engine = engine();
        let err = engine
            .map_reduce(
                MapReduceJob::new(vec![1, 2], 2),
                quick(),
                |items: Vec<i64>| async move { Ok(items.len()) },
                |_: Vec<usize>| async move { Err::<usize, _>(anyhow::anyhow!("reduce exploded")) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reduce(_)));
        assert_eq!(err.to_string(), "reduce exploded");
        assert_eq!(engine.registry().list().total, 0);
    }

    #[tokio::test]
    async fn test_task_timeout_counts_as_failure() {
        let engine = engine();
        let report = engine
            .map_reduce(
                MapReduceJob::new(vec![0u64, 500], 2),
                quick()
                    .fail_on_error(false)
                    .task_timeout(Duration::from_millis(50)),
                |items: Vec<u64>| async move {
                    tokio::time::sleep(Duration::from_millis(items[0])).await;
                    Ok(items[0])
                },
                |done: Vec<u64>| async move { Ok(done) },
            )
            .await
            .unwrap();
        assert_eq!(report.result, vec![0]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].partition, Some(1));
        assert_eq!(report.failures[0].error.code, FailureCode::Timeout);
    }

    #[tokio::test]
    async fn test_destroyed_worker_does_not_shift_report_slots() {
        let engine = engine();
        let registry = engine.registry().clone();
        let mut events = registry.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let FabricEvent::MapStart { workers, .. } = event {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    registry.destroy(&workers[0]);
                    break;
                }
            }
        });

        let report = engine
            .map_reduce(
                MapReduceJob::new(vec![1, 2, 3, 4, 5, 6], 3),
                quick().fail_on_error(false),
                |items: Vec<i64>| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(items.iter().sum::<i64>())
                },
                |sums: Vec<i64>| async move { Ok(sums) },
            )
            .await
            .unwrap();

        // Partitions [1,4] [2,5] [3,6]; only the first worker was lost.
        assert_eq!(report.map_results, vec![7, 9]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].partition, Some(0));
        assert_eq!(engine.registry().list().total, 0);
    }

    #[tokio::test]
    async fn test_dropped_job_tears_down_agents() {
        let engine = engine();
        let mut events = engine.registry().events().subscribe();

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            engine.map_reduce(
                MapReduceJob::new(vec![1, 2, 3], 3),
                quick(),
                |items: Vec<i64>| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(items.len())
                },
                |counts: Vec<usize>| async move { Ok(counts.len()) },
            ),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(engine.registry().list().total, 0);

        let mut terminal = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.is_terminal() {
                terminal.push(event.name());
            }
        }
        assert_eq!(terminal, vec!["job:error"]);
    }

    #[test]
    fn test_report_serializes_duration_in_millis() {
        let report = JobReport {
            job_id: JobId::new(),
            success: true,
            duration: Duration::from_millis(1500),
            workers: vec![],
            map_results: vec![1],
            failures: vec![],
            result: json!(1),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["duration_ms"], 1500);
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_options_from_config() {
        let config = FabricConfig {
            max_retries: 7,
            retry_delay_ms: 25,
            fail_on_error: false,
            task_timeout_ms: Some(900),
            ..FabricConfig::default()
        };
        let options = MapReduceOptions::from_config(&config);
        assert_eq!(options.max_retries, 7);
        assert_eq!(options.retry_delay, Duration::from_millis(25));
        assert!(!options.fail_on_error);
        assert_eq!(options.task_timeout, Some(Duration::from_millis(900)));
    }
}
