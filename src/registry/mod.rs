//! Agent registry for TinyHive.
//!
//! The registry is the single source of truth for which agents exist:
//! - Creates masters (generation 0) and workers (children of a live master)
//! - Mints ids that are never reused
//! - Destroys agents, cascading from a master to its workers
//! - Owns the fabric's event stream

pub mod identity;

pub use identity::{AgentId, AgentIdentity, AgentKind, AgentStatus, Capability};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::{Master, TaskHandler, Worker};
use crate::error::{Error, Result};
use crate::events::{EventBus, FabricEvent, DEFAULT_EVENT_CAPACITY};

/// Callback run after an agent has been destroyed.
pub type DestroyHook = Arc<dyn Fn(&AgentId) + Send + Sync>;

/// A live agent of either role.
#[derive(Debug, Clone)]
pub enum Agent {
    Master(Arc<Master>),
    Worker(Arc<Worker>),
}

impl Agent {
    pub fn id(&self) -> &AgentId {
        match self {
            Agent::Master(m) => m.id(),
            Agent::Worker(w) => w.id(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            Agent::Master(_) => AgentKind::Master,
            Agent::Worker(_) => AgentKind::Worker,
        }
    }

    pub fn identity(&self) -> AgentIdentity {
        match self {
            Agent::Master(m) => m.identity(),
            Agent::Worker(w) => w.identity(),
        }
    }

    pub fn as_master(&self) -> Option<&Arc<Master>> {
        match self {
            Agent::Master(m) => Some(m),
            Agent::Worker(_) => None,
        }
    }

    pub fn as_worker(&self) -> Option<&Arc<Worker>> {
        match self {
            Agent::Worker(w) => Some(w),
            Agent::Master(_) => None,
        }
    }

    fn mark_destroyed(&self) {
        match self {
            Agent::Master(m) => m.mark_destroyed(),
            Agent::Worker(w) => w.mark_destroyed(),
        }
    }
}

/// Agent counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub masters: usize,
    pub workers: usize,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} agents ({} masters, {} workers)",
            self.total, self.masters, self.workers
        )
    }
}

struct RegistryInner {
    agents: RwLock<HashMap<AgentId, Agent>>,
    next_seq: AtomicU64,
    events: EventBus,
    destroy_hooks: RwLock<Vec<DestroyHook>>,
}

/// Shared handle to the agent registry. Cloning is cheap.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl AgentRegistry {
    /// Create an empty registry whose event stream buffers `event_capacity` events.
    pub fn new(event_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                agents: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                events: EventBus::new(event_capacity),
                destroy_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The event stream owned by this registry.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    fn next_id(&self, kind: AgentKind) -> AgentId {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        AgentId::mint(kind, seq)
    }

    /// Create a root master. It always gains `orchestration` and `aggregation`.
    pub fn create_master(
        &self,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Arc<Master> {
        let mut capabilities: BTreeSet<Capability> = capabilities.into_iter().collect();
        capabilities.insert(Capability::Orchestration);
        capabilities.insert(Capability::Aggregation);

        let identity = AgentIdentity {
            id: self.next_id(AgentKind::Master),
            name: name.into(),
            kind: AgentKind::Master,
            parent_id: None,
            generation: 0,
            capabilities,
            created_at: Utc::now(),
            status: AgentStatus::Active,
        };

        let master = Arc::new(Master::new(identity.clone()));
        self.inner
            .agents
            .write()
            .insert(identity.id.clone(), Agent::Master(master.clone()));

        tracing::debug!("Created master {} ({})", identity.id, identity.name);
        self.inner
            .events
            .publish(FabricEvent::AgentCreated { agent: identity });
        master
    }

    /// Create a worker under a live master. It always gains `execution`.
    pub fn create_worker(
        &self,
        parent_id: &AgentId,
        name: impl Into<String>,
        task: Arc<dyn TaskHandler>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Result<Arc<Worker>> {
        let mut capabilities: BTreeSet<Capability> = capabilities.into_iter().collect();
        capabilities.insert(Capability::Execution);

        // Parent lookup and insertion share one write lock so a concurrent
        // destroy of the master cannot orphan the new worker.
        let mut agents = self.inner.agents.write();
        let parent = match agents.get(parent_id) {
            Some(Agent::Master(m)) if !m.is_destroyed() => m.clone(),
            _ => return Err(Error::InvalidParent(parent_id.clone())),
        };

        let identity = AgentIdentity {
            id: self.next_id(AgentKind::Worker),
            name: name.into(),
            kind: AgentKind::Worker,
            parent_id: Some(parent_id.clone()),
            generation: parent.identity().generation + 1,
            capabilities,
            created_at: Utc::now(),
            status: AgentStatus::Active,
        };

        let worker = Arc::new(Worker::new(
            identity.clone(),
            task,
            self.inner.events.clone(),
        ));
        parent.adopt(identity.id.clone());
        agents.insert(identity.id.clone(), Agent::Worker(worker.clone()));
        drop(agents);

        tracing::debug!(
            "Created worker {} ({}) under {}",
            identity.id,
            identity.name,
            parent_id
        );
        self.inner
            .events
            .publish(FabricEvent::AgentCreated { agent: identity });
        Ok(worker)
    }

    /// Look up a live agent.
    pub fn get(&self, id: &AgentId) -> Option<Agent> {
        self.inner.agents.read().get(id).cloned()
    }

    /// Snapshot of a live agent's identity.
    pub fn descriptor(&self, id: &AgentId) -> Option<AgentIdentity> {
        self.get(id).map(|agent| agent.identity())
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.inner.agents.read().contains_key(id)
    }

    /// Agent counts by role.
    pub fn list(&self) -> RegistryStats {
        let agents = self.inner.agents.read();
        let masters = agents
            .values()
            .filter(|a| a.kind() == AgentKind::Master)
            .count();
        RegistryStats {
            total: agents.len(),
            masters,
            workers: agents.len() - masters,
        }
    }

    /// Ids of all live masters.
    pub fn masters(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .inner
            .agents
            .read()
            .values()
            .filter_map(|a| a.as_master().map(|m| m.id().clone()))
            .collect();
        ids.sort();
        ids
    }

    /// Live workers owned by a master, in creation order.
    pub fn children(&self, id: &AgentId) -> Vec<AgentId> {
        let agents = self.inner.agents.read();
        match agents.get(id) {
            Some(Agent::Master(m)) => m
                .worker_ids()
                .into_iter()
                .filter(|w| agents.contains_key(w))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Live agents sharing `id`'s parent, excluding `id` itself.
    /// Empty for masters and unknown ids.
    pub fn siblings(&self, id: &AgentId) -> Vec<AgentId> {
        let parent_id = match self.get(id).and_then(|a| a.identity().parent_id) {
            Some(parent_id) => parent_id,
            None => return Vec::new(),
        };
        self.children(&parent_id)
            .into_iter()
            .filter(|sibling| sibling != id)
            .collect()
    }

    /// Register a callback run for every destroyed agent.
    pub fn on_destroy(&self, hook: DestroyHook) {
        self.inner.destroy_hooks.write().push(hook);
    }

    /// Destroy an agent. Destroying a master destroys its workers first.
    ///
    /// Returns `false` if the agent was already gone; never fails.
    pub fn destroy(&self, id: &AgentId) -> bool {
        let removed = {
            let mut agents = self.inner.agents.write();
            let agent = match agents.remove(id) {
                Some(agent) => agent,
                None => return false,
            };

            let mut removed = Vec::new();
            match &agent {
                Agent::Master(master) => {
                    for worker_id in master.worker_ids() {
                        if let Some(worker) = agents.remove(&worker_id) {
                            removed.push(worker);
                        }
                    }
                }
                Agent::Worker(worker) => {
                    if let Some(Agent::Master(parent)) = agents.get(worker.master_id()) {
                        parent.disown(worker.id());
                    }
                }
            }
            removed.push(agent);
            removed
        };

        let hooks: Vec<DestroyHook> = self.inner.destroy_hooks.read().clone();
        for agent in removed {
            agent.mark_destroyed();
            for hook in &hooks {
                hook(agent.id());
            }
            tracing::debug!("Destroyed {} {}", agent.kind(), agent.id());
            self.inner.events.publish(FabricEvent::AgentDestroyed {
                agent_id: agent.id().clone(),
                kind: agent.kind(),
            });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task_fn;
    use std::sync::atomic::AtomicUsize;

    fn echo() -> Arc<dyn TaskHandler> {
        task_fn(|input| async move { Ok(input) })
    }

    #[test]
    fn test_master_capabilities_and_generation() {
        let registry = AgentRegistry::default();
        let master = registry.create_master("boss", [Capability::Monitoring]);
        let identity = master.identity();

        assert_eq!(identity.generation, 0);
        assert!(identity.parent_id.is_none());
        assert!(identity.has_capability(Capability::Orchestration));
        assert!(identity.has_capability(Capability::Aggregation));
        assert!(identity.has_capability(Capability::Monitoring));
    }

    #[test]
    fn test_worker_generation_is_parent_plus_one() {
        let registry = AgentRegistry::default();
        let master = registry.create_master("boss", []);
        let worker = registry
            .create_worker(master.id(), "w0", echo(), [])
            .unwrap();

        let parent_gen = registry.descriptor(master.id()).unwrap().generation;
        assert_eq!(worker.identity().generation, parent_gen + 1);
        assert_eq!(worker.identity().parent_id.as_ref(), Some(master.id()));
        assert!(worker.identity().has_capability(Capability::Execution));
    }

    #[test]
    fn test_worker_requires_live_master_parent() {
        let registry = AgentRegistry::default();
        let err = registry
            .create_worker(&AgentId::from("ghost"), "w", echo(), [])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParent(_)));

        let master = registry.create_master("boss", []);
        let worker = registry.create_worker(master.id(), "w", echo(), []).unwrap();
        let err = registry
            .create_worker(worker.id(), "grandchild", echo(), [])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParent(_)));

        registry.destroy(master.id());
        let err = registry
            .create_worker(master.id(), "late", echo(), [])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParent(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = AgentRegistry::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let master = registry.create_master("m", []);
            assert!(seen.insert(master.id().clone()));
            registry.destroy(master.id());
        }
    }

    #[test]
    fn test_list_counts() {
        let registry = AgentRegistry::default();
        let a = registry.create_master("a", []);
        registry.create_master("b", []);
        registry.create_worker(a.id(), "w0", echo(), []).unwrap();
        registry.create_worker(a.id(), "w1", echo(), []).unwrap();

        let stats = registry.list();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.masters, 2);
        assert_eq!(stats.workers, 2);
        assert_eq!(registry.masters().len(), 2);
    }

    #[test]
    fn test_destroy_master_cascades() {
        let registry = AgentRegistry::default();
        let master = registry.create_master("boss", []);
        let w0 = registry.create_worker(master.id(), "w0", echo(), []).unwrap();
        let w1 = registry.create_worker(master.id(), "w1", echo(), []).unwrap();

        assert!(registry.destroy(master.id()));
        assert!(registry.get(master.id()).is_none());
        assert!(registry.get(w0.id()).is_none());
        assert!(registry.get(w1.id()).is_none());
        assert!(w0.is_destroyed());
        assert!(master.is_destroyed());
        assert_eq!(registry.list().total, 0);

        // Idempotent
        assert!(!registry.destroy(master.id()));
        assert!(!registry.destroy(w0.id()));
    }

    #[test]
    fn test_destroy_worker_leaves_siblings() {
        let registry = AgentRegistry::default();
        let master = registry.create_master("boss", []);
        let w0 = registry.create_worker(master.id(), "w0", echo(), []).unwrap();
        let w1 = registry.create_worker(master.id(), "w1", echo(), []).unwrap();
        let w2 = registry.create_worker(master.id(), "w2", echo(), []).unwrap();

        assert_eq!(registry.siblings(w0.id()), vec![w1.id().clone(), w2.id().clone()]);
        registry.destroy(w1.id());
        assert_eq!(registry.siblings(w0.id()), vec![w2.id().clone()]);
        assert_eq!(master.worker_ids().len(), 2);
        assert!(registry.siblings(master.id()).is_empty());
    }

    #[test]
    fn test_destroy_hooks_run_per_agent() {
        let registry = AgentRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        registry.on_destroy(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let master = registry.create_master("boss", []);
        registry.create_worker(master.id(), "w0", echo(), []).unwrap();
        registry.create_worker(master.id(), "w1", echo(), []).unwrap();
        registry.destroy(master.id());

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let registry = AgentRegistry::default();
        let mut events = registry.events().subscribe();

        let master = registry.create_master("boss", []);
        registry.destroy(master.id());

        let created = events.recv().await.unwrap();
        assert_eq!(created.name(), "agent:created");
        let destroyed = events.recv().await.unwrap();
        assert_eq!(destroyed.name(), "agent:destroyed");
    }
}
