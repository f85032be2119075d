//! End-to-end map-reduce scenarios against a real registry and bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tinyhive::events::FabricEvent;
use tinyhive::{
    AgentId, Error, MapReduceJob, MapReduceOptions, OrchestrationEngine, PartitionStrategy,
};
use tokio_util::sync::CancellationToken;

fn engine() -> OrchestrationEngine {
    OrchestrationEngine::from_config(tinyhive::FabricConfig::default())
}

fn fast_retries(max_retries: u32) -> MapReduceOptions {
    MapReduceOptions::default()
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(10))
}

fn drain(receiver: &mut tinyhive::events::EventReceiver) -> Vec<FabricEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Results
// ============================================================================

#[tokio::test]
async fn test_sum_end_to_end() {
    let engine = engine();
    let report = engine
        .map_reduce(
            MapReduceJob::new(vec![1, 2, 3, 4, 5, 6], 2),
            fast_retries(3),
            |items: Vec<i64>| async move { Ok(items.iter().sum::<i64>()) },
            |sums: Vec<i64>| async move { Ok(sums.iter().sum::<i64>()) },
        )
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.map_results, vec![9, 12]);
    assert_eq!(report.result, 21);
    assert_eq!(report.workers.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(engine.registry().list().total, 0);
}

#[tokio::test]
async fn test_reduce_sees_partition_order_not_completion_order() {
    let engine = engine();
    let finished = Arc::new(Mutex::new(Vec::new()));
    let log = finished.clone();

    let report = engine
        .map_reduce(
            MapReduceJob::new(vec![0u64, 1], 2),
            fast_retries(0),
            move |items: Vec<u64>| {
                let log = log.clone();
                async move {
                    let partition = items[0];
                    let delay = if partition == 0 { 150 } else { 10 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().push(partition);
                    Ok(partition)
                }
            },
            |ordered: Vec<u64>| async move { Ok(ordered) },
        )
        .await
        .unwrap();

    assert_eq!(*finished.lock(), vec![1, 0]);
    assert_eq!(report.result, vec![0, 1]);
}

#[tokio::test]
async fn test_hash_jobs_are_reproducible() {
    let engine = engine();
    let input: Vec<String> = (0..40).map(|i| format!("user-{}", i % 7)).collect();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let report = engine
            .map_reduce(
                MapReduceJob::new(input.clone(), 3).with_strategy(PartitionStrategy::Hash),
                fast_retries(0),
                |mut keys: Vec<String>| async move {
                    keys.sort();
                    Ok(keys)
                },
                |parts: Vec<Vec<String>>| async move { Ok(parts) },
            )
            .await
            .unwrap();
        runs.push(report.result);
    }
    assert_eq!(runs[0], runs[1]);

    // Equal keys always share a partition.
    for key in ["user-0", "user-3"] {
        let holders = runs[0]
            .iter()
            .filter(|part| part.iter().any(|k| k == key))
            .count();
        assert_eq!(holders, 1);
    }
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_permanent_failure_fails_job_and_cleans_up() {
    let engine = engine();
    let mut events = engine.registry().events().subscribe();

    let err = engine
        .map_reduce(
            MapReduceJob::new((1..=8).collect::<Vec<i64>>(), 4),
            fast_retries(2),
            |items: Vec<i64>| async move {
                if items.contains(&1) {
                    anyhow::bail!("partition holding 1 always fails");
                }
                Ok(items.iter().sum::<i64>())
            },
            |sums: Vec<i64>| async move { Ok(sums.iter().sum::<i64>()) },
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Map phase failed: 1 workers failed");
    match &err {
        Error::MapPhaseFailed { failed, failures } => {
            assert_eq!(*failed, 1);
            assert_eq!(failures[0].partition, Some(0));
            assert_eq!(failures[0].attempts, 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let created: Vec<AgentId> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            FabricEvent::AgentCreated { agent } => Some(agent.id),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 5);
    for id in &created {
        assert!(engine.registry().get(id).is_none(), "{} still registered", id);
    }
}

#[tokio::test]
async fn test_failures_tolerated_when_not_failing_on_error() {
    let engine = engine();
    let report = engine
        .map_reduce(
            MapReduceJob::new(vec![1, 2, 3, 4, 5, 6], 3),
            fast_retries(1).fail_on_error(false),
            |items: Vec<i64>| async move {
                if items.contains(&2) {
                    anyhow::bail!("bad partition");
                }
                Ok(items.iter().sum::<i64>())
            },
            |sums: Vec<i64>| async move { Ok(sums.iter().sum::<i64>()) },
        )
        .await
        .unwrap();

    // Partitions: [1,4] [2,5] [3,6]; the middle one fails.
    assert_eq!(report.map_results, vec![5, 9]);
    assert_eq!(report.result, 14);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].partition, Some(1));
    assert_eq!(engine.registry().list().total, 0);
}

#[tokio::test]
async fn test_cancellation_stops_job() {
    let engine = engine();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = engine
        .map_reduce(
            MapReduceJob::new(vec![1, 2, 3], 3),
            fast_retries(0).cancel_with(token),
            |items: Vec<i64>| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(items.len())
            },
            |counts: Vec<usize>| async move { Ok(counts.len()) },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.registry().list().total, 0);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_job_events_in_order_with_single_terminal() {
    let engine = engine();
    let mut events = engine.registry().events().subscribe();

    let report = engine
        .map_reduce(
            MapReduceJob::new(vec![1, 2, 3], 2),
            fast_retries(0),
            |items: Vec<i64>| async move { Ok(items.len()) },
            |counts: Vec<usize>| async move { Ok(counts.iter().sum::<usize>()) },
        )
        .await
        .unwrap();
    assert_eq!(report.result, 3);

    let job_events: Vec<&'static str> = drain(&mut events)
        .iter()
        .filter(|event| event.job_id() == Some(&report.job_id))
        .map(FabricEvent::name)
        .collect();
    assert_eq!(
        job_events,
        vec![
            "job:start",
            "job:partition",
            "map:start",
            "map:complete",
            "reduce:start",
            "reduce:complete",
            "job:complete",
        ]
    );
}

#[tokio::test]
async fn test_failed_job_emits_job_error_once() {
    let engine = engine();
    let mut events = engine.registry().events().subscribe();

    let _ = engine
        .map_reduce(
            MapReduceJob::new(vec![1, 2], 2),
            fast_retries(0),
            |_: Vec<i64>| async move { Err::<i64, _>(anyhow::anyhow!("nope")) },
            |sums: Vec<i64>| async move { Ok(sums.len()) },
        )
        .await
        .unwrap_err();

    let events = drain(&mut events);
    let terminal: Vec<&FabricEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].name(), "job:error");
    assert!(!events.iter().any(|e| e.name() == "reduce:start"));
}
