//! Fabric event stream.
//!
//! Every registry owns one bounded broadcast channel of [`FabricEvent`]s. Status
//! panels, loggers and tests subscribe read-only; nothing in the fabric depends on
//! anyone listening. A subscriber that falls behind loses the oldest events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::engine::{JobId, PartitionStrategy};
use crate::protocol::{CorrelationId, MessageType};
use crate::registry::{AgentId, AgentIdentity, AgentKind};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Everything observable about the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FabricEvent {
    AgentCreated {
        agent: AgentIdentity,
    },
    AgentDestroyed {
        agent_id: AgentId,
        kind: AgentKind,
    },
    AgentStarted {
        agent_id: AgentId,
    },
    AgentCompleted {
        agent_id: AgentId,
        duration_ms: u64,
    },
    AgentError {
        agent_id: AgentId,
        error: String,
    },
    MessageSent {
        message_id: String,
        message_type: MessageType,
        from: AgentId,
        to: AgentId,
    },
    MessageDenied {
        from: AgentId,
        to: AgentId,
        reason: String,
    },
    RpcTimeout {
        correlation_id: CorrelationId,
        method: String,
        from: AgentId,
        to: AgentId,
    },
    JobStart {
        job_id: JobId,
        input_len: usize,
        num_workers: usize,
        strategy: PartitionStrategy,
    },
    JobPartition {
        job_id: JobId,
        sizes: Vec<usize>,
    },
    MapStart {
        job_id: JobId,
        workers: Vec<AgentId>,
    },
    MapComplete {
        job_id: JobId,
        succeeded: usize,
        failed: usize,
    },
    ReduceStart {
        job_id: JobId,
        inputs: usize,
    },
    ReduceComplete {
        job_id: JobId,
    },
    JobComplete {
        job_id: JobId,
        duration_ms: u64,
    },
    JobError {
        job_id: JobId,
        error: String,
    },
}

impl FabricEvent {
    /// Stable `scope:action` name.
    pub fn name(&self) -> &'static str {
        match self {
            FabricEvent::AgentCreated { .. } => "agent:created",
            FabricEvent::AgentDestroyed { .. } => "agent:destroyed",
            FabricEvent::AgentStarted { .. } => "agent:started",
            FabricEvent::AgentCompleted { .. } => "agent:completed",
            FabricEvent::AgentError { .. } => "agent:error",
            FabricEvent::MessageSent { .. } => "message:sent",
            FabricEvent::MessageDenied { .. } => "message:denied",
            FabricEvent::RpcTimeout { .. } => "rpc:timeout",
            FabricEvent::JobStart { .. } => "job:start",
            FabricEvent::JobPartition { .. } => "job:partition",
            FabricEvent::MapStart { .. } => "map:start",
            FabricEvent::MapComplete { .. } => "map:complete",
            FabricEvent::ReduceStart { .. } => "reduce:start",
            FabricEvent::ReduceComplete { .. } => "reduce:complete",
            FabricEvent::JobComplete { .. } => "job:complete",
            FabricEvent::JobError { .. } => "job:error",
        }
    }

    /// The job this event belongs to, for job-scoped events.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            FabricEvent::JobStart { job_id, .. }
            | FabricEvent::JobPartition { job_id, .. }
            | FabricEvent::MapStart { job_id, .. }
            | FabricEvent::MapComplete { job_id, .. }
            | FabricEvent::ReduceStart { job_id, .. }
            | FabricEvent::ReduceComplete { job_id }
            | FabricEvent::JobComplete { job_id, .. }
            | FabricEvent::JobError { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FabricEvent::JobComplete { .. } | FabricEvent::JobError { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus closed")]
    Closed,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),

    #[error("no event available")]
    Empty,
}

/// Publisher side of the event stream. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FabricEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: FabricEvent) {
        tracing::trace!("Publishing {}", event.name());
        // No subscribers is the normal case.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single job.
    pub fn subscribe_job(&self, job_id: JobId) -> JobEventReceiver {
        JobEventReceiver {
            receiver: self.sender.subscribe(),
            job_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all fabric events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<FabricEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<FabricEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                tracing::warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<FabricEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                tracing::warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Adapt into a `Stream`, skipping over lag gaps.
    pub fn into_stream(self) -> impl Stream<Item = FabricEvent> {
        BroadcastStream::new(self.receiver).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!("Event stream lagged by {} events", n);
                None
            }
        })
    }
}

/// Receiver filtered to one job.
pub struct JobEventReceiver {
    receiver: broadcast::Receiver<FabricEvent>,
    job_id: JobId,
}

impl JobEventReceiver {
    pub async fn recv(&mut self) -> Result<FabricEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if event.job_id() == Some(&self.job_id) {
                return Ok(event);
            }
        }
    }

    /// Collect this job's events up to and including its terminal event.
    pub async fn collect_until_terminal(&mut self) -> Result<Vec<FabricEvent>, EventBusError> {
        let mut events = Vec::new();
        loop {
            let event = self.recv().await?;
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return Ok(events);
            }
        }
    }
}
