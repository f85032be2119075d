//! Agent identities: ids, roles, capabilities.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique agent identifier.
///
/// Minted by the registry as `{role}-{seq}-{ulid}`; the sequence is monotonic per
/// registry so an id is never handed out twice, even after the agent is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub(crate) fn mint(kind: AgentKind, seq: u64) -> Self {
        Self(format!("{}-{}-{}", kind, seq, ulid::Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Agent role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Master,
    Worker,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Master => write!(f, "master"),
            AgentKind::Worker => write!(f, "worker"),
        }
    }
}

/// What an agent is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Orchestration,
    Aggregation,
    Execution,
    Messaging,
    Monitoring,
    Storage,
}

/// Identity lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Destroyed,
}

/// Immutable identity of an agent, plus its status at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: AgentId,
    pub name: String,
    pub kind: AgentKind,
    /// Owning master; `None` for masters.
    pub parent_id: Option<AgentId>,
    /// Root agents are generation 0.
    pub generation: u32,
    pub capabilities: BTreeSet<Capability>,
    pub created_at: DateTime<Utc>,
    pub status: AgentStatus,
}

impl AgentIdentity {
    pub fn is_master(&self) -> bool {
        self.kind == AgentKind::Master
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent_id {
            Some(parent) => write!(f, "{} (type={}, parent={})", self.id, self.kind, parent),
            None => write!(f, "{} (type={}, parent=none)", self.id, self.kind),
        }
    }
}
