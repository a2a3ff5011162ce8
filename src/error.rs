//! Error taxonomy for the agent mesh.
//!
//! Every fallible operation in the mesh returns one of the kinds below rather
//! than a boxed `dyn Error`. This lets callers match on `MeshError` variants
//! instead of downcasting, and keeps the propagation rules from the design
//! (timeouts fall through to the keyword router, cancellation is terminal,
//! etc.) explicit in the type.

use std::fmt;

/// Errors raised by the [`Broker`](crate::broker::Broker).
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// A subscription pattern violated the wildcard placement rules.
    InvalidPattern(String),
    /// `publish`/`subscribe` was called after [`Broker::close`](crate::broker::Broker::close).
    BrokerClosed,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::InvalidPattern(p) => write!(f, "invalid topic pattern: {}", p),
            BrokerError::BrokerClosed => write!(f, "broker is closed"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Errors raised by the [`AgentRegistry`](crate::registry::AgentRegistry).
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// No definition or active instance exists under this name.
    AgentNotFound(String),
    /// `activate` was called for a name that already has a running instance.
    AlreadyActive(String),
    /// A registration used a name that is already taken.
    DuplicateName(String),
    /// The agent's `onActivate` hook failed; the agent is forced back to `INACTIVE`.
    LifecycleError(String),
    /// `activate` did not complete within its time budget.
    Timeout(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AgentNotFound(n) => write!(f, "agent not found: {}", n),
            RegistryError::AlreadyActive(n) => write!(f, "agent already active: {}", n),
            RegistryError::DuplicateName(n) => write!(f, "agent name already registered: {}", n),
            RegistryError::LifecycleError(msg) => write!(f, "agent lifecycle error: {}", msg),
            RegistryError::Timeout(n) => write!(f, "activation of '{}' timed out", n),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors surfaced by the [`Planner`](crate::planner::Planner).
///
/// `MalformedPlan` and `LLMUnavailable` are treated identically by callers:
/// both trigger the keyword-router fallback described in spec §4.5.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// The LLM could not be reached, returned an error, or did not answer
    /// within the configured timeout.
    LLMUnavailable(String),
    /// The LLM answered but the response could not be parsed into a valid
    /// [`ExecutionPlan`](crate::planner::ExecutionPlan), or its declared
    /// confidence fell below the acceptance threshold.
    MalformedPlan(String),
    /// The LLM round-trip exceeded its deadline.
    Timeout,
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::LLMUnavailable(msg) => write!(f, "LLM unavailable: {}", msg),
            PlannerError::MalformedPlan(msg) => write!(f, "malformed plan: {}", msg),
            PlannerError::Timeout => write!(f, "planner LLM call timed out"),
        }
    }
}

impl std::error::Error for PlannerError {}

/// Errors raised while driving a [`Workflow`](crate::coordinator::Workflow)
/// through the [`WorkflowCoordinator`](crate::coordinator::WorkflowCoordinator).
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// A step referenced a dependency id that is not in the plan.
    InvalidPlan(String),
    /// A task-response never arrived before its deadline.
    Timeout(String),
    /// The workflow (or one of its steps) was cancelled before completion.
    Cancelled,
    /// One or more steps failed and the workflow has no alternative path.
    StepFailed(String),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::InvalidPlan(msg) => write!(f, "invalid plan: {}", msg),
            CoordinatorError::Timeout(step) => write!(f, "step '{}' timed out", step),
            CoordinatorError::Cancelled => write!(f, "workflow was cancelled"),
            CoordinatorError::StepFailed(step) => write!(f, "step '{}' failed", step),
        }
    }
}

impl std::error::Error for CoordinatorError {}

/// Top-level error returned by [`Orchestrator::orchestrate`](crate::orchestrator::Orchestrator::orchestrate).
#[derive(Debug, Clone)]
pub enum MeshError {
    Broker(BrokerError),
    Registry(RegistryError),
    Planner(PlannerError),
    Coordinator(CoordinatorError),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::Broker(e) => write!(f, "{}", e),
            MeshError::Registry(e) => write!(f, "{}", e),
            MeshError::Planner(e) => write!(f, "{}", e),
            MeshError::Coordinator(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MeshError {}

impl From<BrokerError> for MeshError {
    fn from(e: BrokerError) -> Self {
        MeshError::Broker(e)
    }
}
impl From<RegistryError> for MeshError {
    fn from(e: RegistryError) -> Self {
        MeshError::Registry(e)
    }
}
impl From<PlannerError> for MeshError {
    fn from(e: PlannerError) -> Self {
        MeshError::Planner(e)
    }
}
impl From<CoordinatorError> for MeshError {
    fn from(e: CoordinatorError) -> Self {
        MeshError::Coordinator(e)
    }
}
