//! Trust-gated message bus.
//!
//! Every send is checked against the [`TrustValidator`] before it is counted or
//! handed to any subscriber. Delivery is synchronous: matching handlers run on the
//! sender's task, in subscription order, so handlers should hand long work off to
//! their own tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rpc::{PendingCalls, RpcHandler};
use super::types::{CorrelationId, Message, MessageKind, MessageType, Priority, RpcOutcome};
use crate::config::FabricConfig;
use crate::error::{Error, Result};
use crate::events::FabricEvent;
use crate::registry::{AgentId, AgentRegistry};
use crate::trust::{Denial, DenialReason, TrustValidator, Verdict};

/// Default deadline for an rpc without an explicit timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Extra traffic a subscriber wants to observe. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub message_type: Option<MessageType>,
    pub from: Option<AgentId>,
    pub to: Option<AgentId>,
}

impl MessageFilter {
    pub fn of_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn from(mut self, agent_id: AgentId) -> Self {
        self.from = Some(agent_id);
        self
    }

    pub fn to(mut self, agent_id: AgentId) -> Self {
        self.to = Some(agent_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.message_type.is_none() && self.from.is_none() && self.to.is_none()
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.message_type.map_or(true, |t| t == message.message_type())
            && self.from.as_ref().map_or(true, |f| f == &message.from)
            && self.to.as_ref().map_or(true, |t| t == &message.to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RpcOptions {
    /// Overrides the bus-wide rpc timeout.
    pub timeout: Option<Duration>,
    pub priority: Priority,
}

impl RpcOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub priority: Priority,
    pub ttl: Option<Duration>,
}

/// Bus counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub sent: u64,
    pub denied: u64,
    pub rpc_pending: usize,
    pub rpc_timeouts: u64,
    pub subscriptions: usize,
}

struct Subscription {
    id: u64,
    agent_id: AgentId,
    filter: MessageFilter,
    handler: MessageHandler,
}

impl Subscription {
    fn accepts(&self, message: &Message) -> bool {
        message.to == self.agent_id || (!self.filter.is_empty() && self.filter.matches(message))
    }
}

struct BusInner {
    registry: AgentRegistry,
    validator: TrustValidator,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    pending: PendingCalls,
    next_subscription: AtomicU64,
    sent: AtomicU64,
    denied: AtomicU64,
    rpc_timeouts: AtomicU64,
    rpc_timeout: Duration,
    default_ttl: Option<Duration>,
}

impl BusInner {
    fn drop_subscriptions(&self, agent_id: &AgentId) {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| &s.agent_id != agent_id);
        let dropped = before - subscriptions.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} subscriptions of {}", dropped, agent_id);
        }
    }
}

/// Returned by [`MessageBus::subscribe`]; unsubscribing is idempotent.
pub struct SubscriptionHandle {
    id: u64,
    agent_id: AgentId,
    bus: Weak<BusInner>,
    unsubscribed: AtomicBool,
}

impl SubscriptionHandle {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            inner.subscriptions.write().retain(|s| s.id != self.id);
        }
    }

    /// Still registered: not unsubscribed and the agent not destroyed.
    pub fn is_active(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.subscriptions.read().iter().any(|s| s.id == self.id),
            None => false,
        }
    }
}

/// Shared handle to the bus. Cloning is cheap.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(registry: AgentRegistry) -> Self {
        Self::with_settings(registry, DEFAULT_RPC_TIMEOUT, None)
    }

    pub fn from_config(registry: AgentRegistry, config: &FabricConfig) -> Self {
        Self::with_settings(registry, config.rpc_timeout(), config.default_ttl())
    }

    pub fn with_settings(
        registry: AgentRegistry,
        rpc_timeout: Duration,
        default_ttl: Option<Duration>,
    ) -> Self {
        let inner = Arc::new(BusInner {
            validator: TrustValidator::new(registry.clone()),
            registry: registry.clone(),
            subscriptions: RwLock::new(Vec::new()),
            pending: PendingCalls::default(),
            next_subscription: AtomicU64::new(1),
            sent: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            rpc_timeouts: AtomicU64::new(0),
            rpc_timeout,
            default_ttl,
        });

        // Destroyed agents lose their listeners.
        let weak = Arc::downgrade(&inner);
        registry.on_destroy(Arc::new(move |agent_id| {
            if let Some(inner) = weak.upgrade() {
                inner.drop_subscriptions(agent_id);
            }
        }));

        Self { inner }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    pub fn validator(&self) -> &TrustValidator {
        &self.inner.validator
    }

    /// Validate and deliver one message.
    ///
    /// Fails with [`Error::UnknownAgent`] when either party is absent or destroyed,
    /// and with [`Error::CommunicationDenied`] when no trust rule applies. Nothing
    /// is delivered in either case; only the denial counter moves.
    pub fn send(&self, mut message: Message) -> Result<Message> {
        if message.metadata.ttl_ms.is_none() {
            if let Some(ttl) = self.inner.default_ttl {
                message = message.with_ttl(ttl);
            }
        }

        match self
            .inner
            .validator
            .can_communicate(&message.from, &message.to)
        {
            Verdict::Allowed(rule) => {
                tracing::trace!(
                    "{} {} -> {} allowed by {}",
                    message.id,
                    message.from,
                    message.to,
                    rule
                );
            }
            Verdict::Denied(denial) => return Err(self.reject(&message, denial)),
        }

        self.inner.sent.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .events()
            .publish(FabricEvent::MessageSent {
                message_id: message.id.clone(),
                message_type: message.message_type(),
                from: message.from.clone(),
                to: message.to.clone(),
            });

        self.dispatch(&message);

        if let MessageKind::Reply {
            correlation_id,
            outcome,
        } = &message.kind
        {
            if message.is_expired() {
                tracing::debug!("Reply {} expired before resolving {}", message.id, correlation_id);
            } else {
                self.inner.pending.resolve(
                    correlation_id,
                    &message.from,
                    &message.to,
                    outcome.clone(),
                );
            }
        }
        Ok(message)
    }

    fn reject(&self, message: &Message, denial: Denial) -> Error {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Denied {:?} message {} -> {}: {}",
            message.message_type(),
            message.from,
            message.to,
            denial
        );
        self.inner
            .registry
            .events()
            .publish(FabricEvent::MessageDenied {
                from: message.from.clone(),
                to: message.to.clone(),
                reason: denial.to_string(),
            });
        if let DenialReason::AgentNotFound { missing } = &denial.reason {
            return Error::UnknownAgent(missing.clone());
        }
        Error::CommunicationDenied(Box::new(denial))
    }

    fn dispatch(&self, message: &Message) {
        if message.is_expired() {
            tracing::debug!("Message {} expired before delivery", message.id);
            return;
        }
        // Snapshot so handlers may send or unsubscribe without deadlocking.
        let targets: Vec<Arc<Subscription>> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.accepts(message))
            .cloned()
            .collect();
        for subscription in targets {
            if !self.inner.registry.contains(&subscription.agent_id) {
                continue;
            }
            (subscription.handler)(message);
        }
    }

    /// Send `payload` to every live sibling of `from`.
    ///
    /// Agents without a parent (masters) cannot broadcast. Siblings destroyed while
    /// the fan-out is in progress are skipped.
    pub fn broadcast(
        &self,
        from: &AgentId,
        payload: Value,
        options: BroadcastOptions,
    ) -> Result<Vec<Message>> {
        let sender = self
            .inner
            .registry
            .descriptor(from)
            .ok_or_else(|| Error::UnknownAgent(from.clone()))?;
        if sender.parent_id.is_none() {
            self.inner.denied.fetch_add(1, Ordering::Relaxed);
            return Err(Error::CommunicationDenied(Box::new(Denial::no_parent(
                &sender,
            ))));
        }

        let siblings = self.inner.registry.siblings(from);
        let mut delivered = Vec::with_capacity(siblings.len());
        for sibling in siblings {
            let mut message = Message::broadcast(from.clone(), sibling.clone(), payload.clone())
                .with_priority(options.priority);
            if let Some(ttl) = options.ttl {
                message = message.with_ttl(ttl);
            }
            match self.send(message) {
                Ok(message) => delivered.push(message),
                Err(Error::UnknownAgent(id)) if id == sibling => {
                    tracing::debug!("Skipping sibling {} destroyed mid-broadcast", id);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!("Broadcast from {} reached {} siblings", from, delivered.len());
        Ok(delivered)
    }

    /// Call `method` on `to` and wait for the correlated reply.
    ///
    /// The wait is bounded by `options.timeout` (or the bus default); after that
    /// the call fails with [`Error::RpcTimeout`] and any later reply is ignored.
    pub async fn rpc(
        &self,
        from: &AgentId,
        to: &AgentId,
        method: &str,
        params: Value,
        options: RpcOptions,
    ) -> Result<Value> {
        let timeout = options.timeout.unwrap_or(self.inner.rpc_timeout);
        let correlation_id = CorrelationId::new();
        let reply_rx = self.inner.pending.register(correlation_id.clone(), method, from, to);

        let request = Message::rpc(
            from.clone(),
            to.clone(),
            method,
            params,
            correlation_id.clone(),
        )
        .with_priority(options.priority);
        if let Err(e) = self.send(request) {
            self.inner.pending.cancel(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(RpcOutcome::Result(value))) => Ok(value),
            Ok(Ok(RpcOutcome::Error(message))) => Err(Error::RpcFailed {
                method: method.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(Error::RpcFailed {
                method: method.to_string(),
                message: "reply channel closed".to_string(),
            }),
            Err(_) => {
                self.inner.pending.cancel(&correlation_id);
                self.inner.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "RPC '{}' {} -> {} timed out after {}ms",
                    method,
                    from,
                    to,
                    timeout.as_millis()
                );
                self.inner
                    .registry
                    .events()
                    .publish(FabricEvent::RpcTimeout {
                        correlation_id: correlation_id.clone(),
                        method: method.to_string(),
                        from: from.clone(),
                        to: to.clone(),
                    });
                Err(Error::RpcTimeout {
                    method: method.to_string(),
                    correlation_id: correlation_id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Answer an rpc request with the same correlation id.
    ///
    /// Returns `Ok(None)` if `request` is not an rpc. A reply whose caller already
    /// timed out is delivered like any message but resolves nothing.
    pub fn reply(&self, request: &Message, outcome: RpcOutcome) -> Result<Option<Message>> {
        match request.reply(outcome) {
            Some(reply) => self.send(reply).map(Some),
            None => Ok(None),
        }
    }

    /// Answer every rpc addressed to `agent_id` with `handler`, one request at a time.
    pub fn serve(
        &self,
        agent_id: &AgentId,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<SubscriptionHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("rpc responders need a tokio runtime".to_string()))?;
        let bus = Arc::downgrade(&self.inner);
        let responder = agent_id.clone();
        let gate = Arc::new(tokio::sync::Mutex::new(()));

        self.subscribe(agent_id, MessageFilter::default(), move |message| {
            if message.to != responder {
                return;
            }
            let (method, params) = match &message.kind {
                MessageKind::Rpc { method, params, .. } => (method.clone(), params.clone()),
                _ => return,
            };
            let request = message.clone();
            let handler = handler.clone();
            let bus = bus.clone();
            let gate = gate.clone();
            runtime.spawn(async move {
                let _serial = gate.lock().await;
                let outcome = match handler.handle(&method, params, &request.from).await {
                    Ok(value) => RpcOutcome::Result(value),
                    Err(e) => RpcOutcome::Error(format!("{:#}", e)),
                };
                if let Some(inner) = bus.upgrade() {
                    let bus = MessageBus { inner };
                    if let Err(e) = bus.reply(&request, outcome) {
                        tracing::debug!("Reply to {} not delivered: {}", request.from, e);
                    }
                }
            });
        })
    }

    /// Invoke `handler` for every message sent to `agent_id`, plus any message
    /// matching a non-empty `filter`.
    pub fn subscribe<F>(
        &self,
        agent_id: &AgentId,
        filter: MessageFilter,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        if !self.inner.registry.contains(agent_id) {
            return Err(Error::UnknownAgent(agent_id.clone()));
        }
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.write().push(Arc::new(Subscription {
            id,
            agent_id: agent_id.clone(),
            filter,
            handler: Arc::new(handler),
        }));
        Ok(SubscriptionHandle {
            id,
            agent_id: agent_id.clone(),
            bus: Arc::downgrade(&self.inner),
            unsubscribed: AtomicBool::new(false),
        })
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            sent: self.inner.sent.load(Ordering::Relaxed),
            denied: self.inner.denied.load(Ordering::Relaxed),
            rpc_pending: self.inner.pending.len(),
            rpc_timeouts: self.inner.rpc_timeouts.load(Ordering::Relaxed),
            subscriptions: self.inner.subscriptions.read().len(),
        }
    }
}

/// Closure-backed [`RpcHandler`]; the closure gets the method name and params.
pub struct FnRpc<F>(F);

#[async_trait]
impl<F, Fut> RpcHandler for FnRpc<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn handle(&self, method: &str, params: Value, _caller: &AgentId) -> anyhow::Result<Value> {
        (self.0)(method.to_string(), params).await
    }
}

pub fn rpc_fn<F, Fut>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnRpc(f))
}
