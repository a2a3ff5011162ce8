//! Agent registry and lifecycle management (spec §4.3).
//!
//! Agents are registered under a stable `name` together with a factory that
//! builds fresh instances. `activate` turns a registration into a running,
//! subscribed instance; `deactivate`/`shutdown_all` unwind it again. The
//! registry is the only place that holds a strong [`Arc`] to a running
//! agent — [`AgentContext`] handles handed to agents are non-owning.

use crate::agent::{Agent, AgentContext, AgentSubscriber, LifecycleState};
use crate::broker::Broker;
use crate::error::RegistryError;
use crate::event::AgentId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};

/// Builds a fresh agent instance for a given identity.
pub type AgentFactory = Arc<dyn Fn(AgentId) -> Arc<dyn Agent> + Send + Sync>;

/// A named, registered agent type, not yet instantiated.
#[derive(Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub factory: AgentFactory,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// Summary of a running agent, returned by `get`/`list`/`discover`.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub description: String,
    pub capabilities: Vec<String>,
    pub state: LifecycleState,
}

struct ActiveEntry {
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
    definition: AgentDefinition,
    state: LifecycleState,
}

/// Time budget for a single `activate` call, including the agent's
/// `on_activate` hook.
const ACTIVATION_BUDGET: Duration = Duration::from_secs(5);

/// Registers agent definitions and manages the lifecycle of their running
/// instances (`INACTIVE -> ACTIVE -> DESTROYED`, spec §4.3).
pub struct AgentRegistry {
    broker: Arc<dyn Broker>,
    definitions: RwLock<HashMap<String, AgentDefinition>>,
    active: RwLock<HashMap<AgentId, ActiveEntry>>,
}

impl AgentRegistry {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            definitions: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent type under `definition.name`. Fails if that name is
    /// already registered.
    pub async fn register(&self, definition: AgentDefinition) -> Result<(), RegistryError> {
        let mut defs = self.definitions.write().await;
        if defs.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }
        defs.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Instantiate `name`'s factory under `agent_id`, run `on_activate`, and
    /// mark it `ACTIVE`. Bounded by a 5s activation budget.
    pub async fn activate(&self, name: &str, agent_id: AgentId) -> Result<AgentInfo, RegistryError> {
        if self.active.read().await.contains_key(&agent_id) {
            return Err(RegistryError::AlreadyActive(agent_id.to_string()));
        }
        let definition = self
            .definitions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::AgentNotFound(name.to_string()))?;

        let agent = (definition.factory)(agent_id.clone());
        let ctx = AgentContext::new(agent_id.clone(), self.broker.clone());

        match timeout(ACTIVATION_BUDGET, agent.on_activate(&ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => return Err(RegistryError::LifecycleError(msg)),
            Err(_) => return Err(RegistryError::Timeout(agent_id.to_string())),
        }

        let info = AgentInfo {
            agent_id: agent_id.clone(),
            description: definition.description.clone(),
            capabilities: definition.capabilities.clone(),
            state: LifecycleState::Active,
        };

        self.active.write().await.insert(
            agent_id,
            ActiveEntry {
                agent,
                ctx,
                definition,
                state: LifecycleState::Active,
            },
        );
        Ok(info)
    }

    /// Run `on_deactivate` and mark `agent_id` `INACTIVE`. The instance is
    /// kept registered so it can be re-activated.
    pub async fn deactivate(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        let mut active = self.active.write().await;
        let entry = active
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;
        entry
            .agent
            .on_deactivate(&entry.ctx)
            .await
            .map_err(RegistryError::LifecycleError)?;
        entry.state = LifecycleState::Inactive;
        Ok(())
    }

    pub async fn get(&self, agent_id: &AgentId) -> Option<AgentInfo> {
        self.active.read().await.get(agent_id).map(|e| AgentInfo {
            agent_id: agent_id.clone(),
            description: e.definition.description.clone(),
            capabilities: e.definition.capabilities.clone(),
            state: e.state,
        })
    }

    pub async fn list(&self) -> Vec<AgentInfo> {
        self.active
            .read()
            .await
            .iter()
            .map(|(id, e)| AgentInfo {
                agent_id: id.clone(),
                description: e.definition.description.clone(),
                capabilities: e.definition.capabilities.clone(),
                state: e.state,
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|e| e.state == LifecycleState::Active)
            .count()
    }

    /// Agents currently `ACTIVE` whose capability list contains `capability`.
    pub async fn discover(&self, capability: &str) -> Vec<AgentInfo> {
        self.active
            .read()
            .await
            .iter()
            .filter(|(_, e)| {
                e.state == LifecycleState::Active
                    && e.definition.capabilities.iter().any(|c| c == capability)
            })
            .map(|(id, e)| AgentInfo {
                agent_id: id.clone(),
                description: e.definition.description.clone(),
                capabilities: e.definition.capabilities.clone(),
                state: e.state,
            })
            .collect()
    }

    /// Run `on_destroy` for every active instance and remove it from the
    /// registry. Best-effort: a single agent's failure doesn't stop the rest.
    pub async fn shutdown_all(&self) {
        let mut active = self.active.write().await;
        for (id, entry) in active.iter_mut() {
            if let Err(msg) = entry.agent.on_destroy(&entry.ctx).await {
                log::warn!("agent '{}' failed to destroy cleanly: {}", id, msg);
            }
            entry.state = LifecycleState::Destroyed;
        }
        active.clear();
    }

    /// Build an [`EventSubscriber`](crate::broker::EventSubscriber) adapter
    /// for an already-active agent, for direct subscription outside `on_activate`.
    pub async fn subscriber_for(&self, agent_id: &AgentId) -> Option<Arc<dyn crate::broker::EventSubscriber>> {
        let active = self.active.read().await;
        let entry = active.get(agent_id)?;
        Some(adapt(entry.agent.clone(), entry.ctx.clone()))
    }
}

fn adapt(agent: Arc<dyn Agent>, ctx: AgentContext) -> Arc<dyn crate::broker::EventSubscriber> {
    struct Wrap(Arc<dyn Agent>, AgentContext);
    #[async_trait::async_trait]
    impl crate::broker::EventSubscriber for Wrap {
        async fn handle_event(&self, event: crate::event::Event) -> Result<(), String> {
            self.0.handle_event(&self.1, event).await
        }
    }
    Arc::new(Wrap(agent, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::event::Event;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Noop(AgentId);

    #[async_trait]
    impl Agent for Noop {
        fn id(&self) -> &AgentId {
            &self.0
        }
        async fn handle_event(&self, _ctx: &AgentContext, _event: Event) -> Result<(), String> {
            Ok(())
        }
    }

    fn registry() -> AgentRegistry {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
        AgentRegistry::new(broker)
    }

    #[tokio::test]
    async fn register_activate_list_deactivate_roundtrip() {
        let registry = registry();
        registry
            .register(AgentDefinition {
                name: "weather".to_string(),
                factory: Arc::new(|id| Arc::new(Noop(id))),
                description: "reports current weather".to_string(),
                capabilities: vec!["weather.current".to_string()],
            })
            .await
            .unwrap();

        let info = registry
            .activate("weather", AgentId::new("weather-1"))
            .await
            .unwrap();
        assert_eq!(info.state, LifecycleState::Active);
        assert_eq!(registry.count().await, 1);

        let found = registry.discover("weather.current").await;
        assert_eq!(found.len(), 1);

        registry.deactivate(&AgentId::new("weather-1")).await.unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = registry();
        let def = AgentDefinition {
            name: "x".to_string(),
            factory: Arc::new(|id| Arc::new(Noop(id))),
            description: String::new(),
            capabilities: vec![],
        };
        registry.register(def.clone()).await.unwrap();
        let err = registry.register(def).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn activating_unknown_name_fails() {
        let registry = registry();
        let err = registry
            .activate("ghost", AgentId::new("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_all_clears_registry() {
        let registry = registry();
        registry
            .register(AgentDefinition {
                name: "x".to_string(),
                factory: Arc::new(|id| Arc::new(Noop(id))),
                description: String::new(),
                capabilities: vec![],
            })
            .await
            .unwrap();
        registry.activate("x", AgentId::new("x-1")).await.unwrap();
        registry.shutdown_all().await;
        assert_eq!(registry.count().await, 0);
    }
}
