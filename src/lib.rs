//! An in-process agent mesh: a topic-based pub/sub broker, an agent
//! registry with explicit lifecycle management, an LLM-driven planner and
//! DAG workflow coordinator, and a rule-based fallback layer for when the
//! LLM is slow, unreachable, or untrustworthy.

pub mod agent;
pub mod broker;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod fallback;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod task;

pub use agent::{Agent, AgentContext, AgentSubscriber, LifecycleState};
pub use broker::{Broker, EventSubscriber, InMemoryBroker, Subscription};
pub use cache::{CachedIntent, CacheStats, IntentCache, ResponseCache, TtlLruCache};
pub use config::{FallbackConfig, OrchestratorConfig, ResponseCacheConfig};
pub use coordinator::{TaskExecution, TaskExecutionStatus, Workflow, WorkflowCoordinator, WorkflowState};
pub use error::{BrokerError, CoordinatorError, MeshError, PlannerError, RegistryError};
pub use event::{AgentId, DeliveryMode, DeliveryOptions, Event};
pub use fallback::{FallbackEngine, FallbackEngineConfig, FallbackRule};
pub use llm::{ChatRequest, ChatResponse, HttpLlmClient, LlmClient, LlmError, MockLlmClient};
pub use normalize::{normalize_date, normalize_language, normalize_location, normalize_prompt};
pub use orchestrator::Orchestrator;
pub use planner::{keyword_route, ExecutionPlan, Planner, TaskStep};
pub use registry::{AgentDefinition, AgentFactory, AgentInfo, AgentRegistry};
pub use task::{task_topic, PendingResponseError, PendingResponses, TaskRequest, TaskResponse};
