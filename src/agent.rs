//! The agent contract (spec §4.2): a black box identified by an [`AgentId`]
//! that reacts to events delivered by the [`Broker`]. Business logic for any
//! individual agent is out of scope here; this module only defines the
//! shape every agent must implement and the context handed to it.

use crate::broker::{Broker, EventSubscriber};
use crate::error::BrokerError;
use crate::event::{AgentId, DeliveryOptions, Event};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Capability handle given to an agent at activation time.
///
/// Wraps a non-owning [`Arc`] to the broker so agents can publish and
/// subscribe without holding a strong reference back to their own registry
/// entry — the cyclic-reference concern spec §9 raises for agent/registry
/// ownership.
#[derive(Clone)]
pub struct AgentContext {
    agent_id: AgentId,
    broker: Arc<dyn Broker>,
}

impl AgentContext {
    pub fn new(agent_id: AgentId, broker: Arc<dyn Broker>) -> Self {
        Self { agent_id, broker }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Publish an event as this agent, stamping `sender` automatically.
    pub async fn publish(&self, topic: impl Into<String>, payload: Value) -> Result<(), BrokerError> {
        let event = Event::new(topic, payload).from_sender(self.agent_id.clone());
        self.broker.publish(event).await
    }

    /// Publish with explicit delivery options (e.g. reliable mode for a task request).
    pub async fn publish_with_delivery(
        &self,
        topic: impl Into<String>,
        payload: Value,
        delivery: DeliveryOptions,
    ) -> Result<(), BrokerError> {
        let event = Event::new(topic, payload)
            .from_sender(self.agent_id.clone())
            .with_delivery(delivery);
        self.broker.publish(event).await
    }

    /// Subscribe `handler` to `pattern` under this agent's identity.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventSubscriber>,
    ) -> Result<(), BrokerError> {
        self.broker
            .subscribe(self.agent_id.clone(), pattern, handler)
            .await
    }

    pub async fn unsubscribe(&self, pattern: &str) {
        self.broker.unsubscribe(&self.agent_id, pattern).await
    }
}

/// An agent's lifecycle state within the [`AgentRegistry`](crate::registry::AgentRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Inactive,
    Active,
    Destroyed,
}

/// A participant in the mesh.
///
/// Every hook is async and must return promptly: `handle_event` in
/// particular must never block on long-running work, and must surface
/// failures as an `Err` rather than panicking (the broker treats a panic as
/// an unrecoverable bug, not a retryable delivery failure).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity, usually assigned at registration time.
    fn id(&self) -> &AgentId;

    /// Called once when the agent transitions `INACTIVE -> ACTIVE`. Typically
    /// subscribes to the topics this agent cares about.
    async fn on_activate(&self, ctx: &AgentContext) -> Result<(), String> {
        let _ = ctx;
        Ok(())
    }

    /// Called once when the agent transitions `ACTIVE -> INACTIVE`. Typically
    /// unsubscribes everything it registered in `on_activate`.
    async fn on_deactivate(&self, ctx: &AgentContext) -> Result<(), String> {
        let _ = ctx;
        Ok(())
    }

    /// Called once when the agent is permanently retired (`-> DESTROYED`).
    async fn on_destroy(&self, ctx: &AgentContext) -> Result<(), String> {
        let _ = ctx;
        Ok(())
    }

    /// Handle one delivered event. Non-blocking; errors are reported to the
    /// broker's delivery/retry machinery rather than thrown synchronously.
    async fn handle_event(&self, ctx: &AgentContext, event: Event) -> Result<(), String>;
}

/// Adapts any [`Agent`] + its [`AgentContext`] to the broker's
/// [`EventSubscriber`] contract, so registering an agent's subscriptions is a
/// one-line call.
pub struct AgentSubscriber<A: Agent + 'static> {
    agent: Arc<A>,
    ctx: AgentContext,
}

impl<A: Agent + 'static> AgentSubscriber<A> {
    pub fn new(agent: Arc<A>, ctx: AgentContext) -> Self {
        Self { agent, ctx }
    }
}

#[async_trait]
impl<A: Agent + 'static> EventSubscriber for AgentSubscriber<A> {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        self.agent.handle_event(&self.ctx, event).await
    }
}
