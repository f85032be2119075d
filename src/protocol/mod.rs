//! Agent communication protocol for TinyHive.
//!
//! This module defines how agents talk to each other:
//! - Typed messages (direct, broadcast, rpc, reply) with correlation ids
//! - A message bus that checks trust boundaries before every send
//! - RPC correlation with hard timeouts
//! - Per-agent subscriptions with filters

pub mod bus;
pub mod rpc;
pub mod types;

pub use bus::{
    rpc_fn, BroadcastOptions, BusStats, MessageBus, MessageFilter, MessageHandler, RpcOptions,
    SubscriptionHandle,
};
pub use rpc::RpcHandler;
pub use types::{
    CorrelationId, Message, MessageKind, MessageMetadata, MessageType, Priority, RpcOutcome,
};
