//! Message types for the agent messaging protocol.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::AgentId;

/// Opaque token linking an RPC request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message type classification, without payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Direct,
    Broadcast,
    Rpc,
    /// Answer to an `Rpc`, carrying the same correlation id.
    Reply,
}

/// Message priority levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

/// How an RPC was answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOutcome {
    Result(Value),
    Error(String),
}

/// Payload, tagged by message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Direct {
        payload: Value,
    },
    Broadcast {
        payload: Value,
    },
    Rpc {
        method: String,
        params: Value,
        correlation_id: CorrelationId,
    },
    Reply {
        correlation_id: CorrelationId,
        outcome: RpcOutcome,
    },
}

impl MessageKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageKind::Direct { .. } => MessageType::Direct,
            MessageKind::Broadcast { .. } => MessageType::Broadcast,
            MessageKind::Rpc { .. } => MessageType::Rpc,
            MessageKind::Reply { .. } => MessageType::Reply,
        }
    }
}

/// Delivery metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub priority: Priority,
    /// Time to live in milliseconds; expired messages are not delivered.
    pub ttl_ms: Option<u64>,
}

/// A message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (ULID)
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub from: AgentId,
    pub to: AgentId,
    #[serde(flatten)]
    pub kind: MessageKind,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(from: AgentId, to: AgentId, kind: MessageKind) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            from,
            to,
            kind,
            metadata: MessageMetadata::default(),
        }
    }

    pub fn direct(from: AgentId, to: AgentId, payload: Value) -> Self {
        Self::new(from, to, MessageKind::Direct { payload })
    }

    pub fn broadcast(from: AgentId, to: AgentId, payload: Value) -> Self {
        Self::new(from, to, MessageKind::Broadcast { payload })
    }

    pub fn rpc(
        from: AgentId,
        to: AgentId,
        method: impl Into<String>,
        params: Value,
        correlation_id: CorrelationId,
    ) -> Self {
        Self::new(
            from,
            to,
            MessageKind::Rpc {
                method: method.into(),
                params,
                correlation_id,
            },
        )
    }

    /// Build the reply to an rpc message, addressed back to its sender.
    ///
    /// Returns `None` when `self` is not an rpc request.
    pub fn reply(&self, outcome: RpcOutcome) -> Option<Self> {
        match &self.kind {
            MessageKind::Rpc { correlation_id, .. } => Some(
                Self::new(
                    self.to.clone(),
                    self.from.clone(),
                    MessageKind::Reply {
                        correlation_id: correlation_id.clone(),
                        outcome,
                    },
                )
                .with_priority(self.metadata.priority),
            ),
            _ => None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.metadata.ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.kind.message_type()
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match &self.kind {
            MessageKind::Rpc { correlation_id, .. } | MessageKind::Reply { correlation_id, .. } => {
                Some(correlation_id)
            }
            _ => None,
        }
    }

    /// Check if the message outlived its TTL.
    pub fn is_expired(&self) -> bool {
        match self.metadata.ttl_ms {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(self.timestamp);
                age.num_milliseconds() >= ttl as i64
            }
            None => false,
        }
    }
}
