//! TinyHive library root.
//!
//! A registry of master and worker agents, a message bus that only carries
//! traffic across trusted relationships, and a map-reduce engine built on both.

pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod trust;

pub use agent::{task_fn, Master, TaskHandler, TaskOutcome, Worker, WorkerStatus};
pub use cli::Commands;
pub use config::{load_config, load_config_or_default, FabricConfig};
pub use engine::{
    JobId, JobReport, MapReduceJob, MapReduceOptions, OrchestrationEngine, PartitionStrategy,
};
pub use error::{Error, Result};
pub use events::{EventBus, FabricEvent};
pub use protocol::{Message, MessageBus, MessageFilter, RpcHandler, RpcOptions};
pub use registry::{AgentId, AgentIdentity, AgentKind, AgentRegistry, Capability};
pub use trust::{TrustValidator, Verdict};
