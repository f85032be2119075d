//! RPC correlation table.
//!
//! Each outstanding call owns a oneshot sender keyed by its correlation id. The
//! entry is removed by whichever comes first, the reply or the caller's timeout,
//! so a call resolves at most once and anything arriving later finds nothing.
//! Only the callee, replying to the caller, can resolve a call.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::types::{CorrelationId, RpcOutcome};
use crate::registry::AgentId;

/// Responder-side logic for rpc requests addressed to an agent.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value, caller: &AgentId) -> anyhow::Result<Value>;
}

struct PendingCall {
    method: String,
    caller: AgentId,
    callee: AgentId,
    reply_tx: oneshot::Sender<RpcOutcome>,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl PendingCalls {
    /// Open a slot for a call from `caller` to `callee`; the receiver yields the reply.
    pub(crate) fn register(
        &self,
        correlation_id: CorrelationId,
        method: &str,
        caller: &AgentId,
        callee: &AgentId,
    ) -> oneshot::Receiver<RpcOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.calls.lock().insert(
            correlation_id,
            PendingCall {
                method: method.to_string(),
                caller: caller.clone(),
                callee: callee.clone(),
                reply_tx,
            },
        );
        reply_rx
    }

    /// Hand `outcome` to the waiting caller. `false` if nobody is waiting, or if
    /// the reply did not come from the callee addressed to the caller. A mismatched
    /// reply leaves the call open.
    pub(crate) fn resolve(
        &self,
        correlation_id: &CorrelationId,
        from: &AgentId,
        to: &AgentId,
        outcome: RpcOutcome,
    ) -> bool {
        let call = {
            let mut calls = self.calls.lock();
            match calls.get(correlation_id) {
                Some(call) if &call.callee != from || &call.caller != to => {
                    tracing::warn!(
                        "Ignoring reply {} -> {} for rpc '{}' ({}) between {} and {}",
                        from,
                        to,
                        call.method,
                        correlation_id,
                        call.caller,
                        call.callee
                    );
                    return false;
                }
                _ => calls.remove(correlation_id),
            }
        };
        match call {
            Some(call) => {
                tracing::debug!("Resolved rpc '{}' ({})", call.method, correlation_id);
                // The caller may have given up between removal and send.
                call.reply_tx.send(outcome).is_ok()
            }
            None => {
                tracing::debug!("Dropping reply for unknown correlation {}", correlation_id);
                false
            }
        }
    }

    /// Drop the slot without answering.
    pub(crate) fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.calls.lock().remove(correlation_id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use serde_json::json;

    fn parties() -> (AgentId, AgentId, AgentId) {
        let registry = AgentRegistry::default();
        (
            registry.create_master("caller", []).id().clone(),
            registry.create_master("callee", []).id().clone(),
            registry.create_master("other", []).id().clone(),
        )
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let (caller, callee, _) = parties();
        let pending = PendingCalls::default();
        let cid = CorrelationId::new();
        let rx = pending.register(cid.clone(), "sum", &caller, &callee);
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&cid, &callee, &caller, RpcOutcome::Result(json!(3))));
        assert!(!pending.resolve(&cid, &callee, &caller, RpcOutcome::Result(json!(4))));
        assert_eq!(rx.await.unwrap(), RpcOutcome::Result(json!(3)));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_reply_from_wrong_party_keeps_call_open() {
        let (caller, callee, other) = parties();
        let pending = PendingCalls::default();
        let cid = CorrelationId::new();
        let rx = pending.register(cid.clone(), "sum", &caller, &callee);

        // Wrong sender, then right sender but wrong addressee.
        assert!(!pending.resolve(&cid, &other, &caller, RpcOutcome::Result(json!("forged"))));
        assert!(!pending.resolve(&cid, &callee, &other, RpcOutcome::Result(json!("forged"))));
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&cid, &callee, &caller, RpcOutcome::Result(json!(3))));
        assert_eq!(rx.await.unwrap(), RpcOutcome::Result(json!(3)));
    }

    #[test]
    fn test_cancel_then_late_reply_is_dropped() {
        let (caller, callee, _) = parties();
        let pending = PendingCalls::default();
        let cid = CorrelationId::new();
        let _rx = pending.register(cid.clone(), "slow", &caller, &callee);

        assert!(pending.cancel(&cid));
        assert!(!pending.cancel(&cid));
        assert!(!pending.resolve(&cid, &callee, &caller, RpcOutcome::Error("late".into())));
    }
}
