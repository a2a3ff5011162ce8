//! Workflow coordinator: drives an [`ExecutionPlan`] to completion by
//! publishing one [`TaskRequest`] per ready step and waiting for its
//! [`TaskResponse`], respecting the plan's dependency DAG (spec §4.6).

use crate::broker::{Broker, EventSubscriber};
use crate::error::CoordinatorError;
use crate::event::{AgentId, DeliveryOptions, Event};
use crate::planner::{ExecutionPlan, TaskStep};
use crate::task::{task_topic, PendingResponseError, PendingResponses, TaskRequest, TaskResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task_id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    pub status: TaskExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub request: String,
    pub user_context: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub plan: ExecutionPlan,
    pub results: HashMap<String, TaskResponse>,
    pub task_status: HashMap<String, TaskExecutionStatus>,
    pub final_result: Option<Value>,
    pub error: Option<String>,
}

/// Default per-task wait before a step is considered timed out.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Schedules an [`ExecutionPlan`]'s steps over the broker, respecting
/// declared dependencies. Each ready step is dispatched as a `task.<capability>`
/// request; replies land on a per-task topic this coordinator subscribes to
/// itself, and are correlated through [`PendingResponses`].
pub struct WorkflowCoordinator {
    broker: Arc<dyn Broker>,
    pending: PendingResponses,
    coordinator_id: AgentId,
    task_timeout: Duration,
    parallel_execution: bool,
}

struct ReplyRouter {
    pending: PendingResponses,
}

#[async_trait]
impl EventSubscriber for ReplyRouter {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        let response: TaskResponse =
            serde_json::from_value(event.payload).map_err(|e| e.to_string())?;
        self.pending.complete(response).await;
        Ok(())
    }
}

impl WorkflowCoordinator {
    pub async fn new(broker: Arc<dyn Broker>, parallel_execution: bool) -> Result<Self, CoordinatorError> {
        let coordinator_id = AgentId::new(format!("workflow-coordinator-{}", Uuid::new_v4()));
        let pending = PendingResponses::new();
        broker
            .subscribe(
                coordinator_id.clone(),
                &format!("coordinator.{}.replies.**", coordinator_id.as_str()),
                Arc::new(ReplyRouter {
                    pending: pending.clone(),
                }),
            )
            .await
            .map_err(|e| CoordinatorError::InvalidPlan(e.to_string()))?;

        Ok(Self {
            broker,
            pending,
            coordinator_id,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            parallel_execution,
        })
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Run `plan` to completion (or first unrecoverable failure).
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        request: &str,
        user_context: Option<Value>,
    ) -> Workflow {
        let workflow_id = Uuid::new_v4().to_string();
        let mut workflow = Workflow {
            id: workflow_id.clone(),
            request: request.to_string(),
            user_context: user_context.clone(),
            started_at: Utc::now(),
            state: WorkflowState::Running,
            plan: plan.clone(),
            results: HashMap::new(),
            task_status: plan
                .steps
                .iter()
                .map(|s| (s.id.clone(), TaskExecutionStatus::Pending))
                .collect(),
            final_result: None,
            error: None,
        };

        let steps_by_id: HashMap<&str, &TaskStep> =
            plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut completed: HashSet<String> = HashSet::new();

        while completed.len() < plan.steps.len() {
            let ready: Vec<&TaskStep> = plan
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.id))
                .filter(|s| {
                    plan.dependencies
                        .get(&s.id)
                        .map(|deps| deps.iter().all(|d| completed.contains(d)))
                        .unwrap_or(true)
                })
                .collect();

            if ready.is_empty() {
                workflow.state = WorkflowState::Failed;
                workflow.error = Some("no ready steps but workflow incomplete (cycle or unmet dependency)".to_string());
                return workflow;
            }

            let outcomes = if self.parallel_execution {
                let futures = ready.iter().map(|step| self.run_step(&workflow_id, step, user_context.clone()));
                futures_util::future::join_all(futures).await
            } else {
                let mut ordered = ready.clone();
                ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
                let mut outcomes = Vec::new();
                for step in ordered {
                    outcomes.push(self.run_step(&workflow_id, step, user_context.clone()).await);
                }
                outcomes
            };

            for (step, outcome) in ready.iter().zip(outcomes.into_iter()) {
                match outcome {
                    Ok(response) => {
                        workflow
                            .task_status
                            .insert(step.id.clone(), TaskExecutionStatus::Completed);
                        workflow.results.insert(step.id.clone(), response);
                        completed.insert(step.id.clone());
                    }
                    Err(err) => {
                        workflow
                            .task_status
                            .insert(step.id.clone(), TaskExecutionStatus::Failed);
                        workflow.state = WorkflowState::Failed;
                        workflow.error = Some(err.to_string());
                        return workflow;
                    }
                }
            }
        }

        let _ = steps_by_id;
        workflow.state = WorkflowState::Completed;
        workflow.final_result = Some(Value::Array(
            plan.steps
                .iter()
                .filter_map(|s| workflow.results.get(&s.id))
                .filter_map(|r| r.result.clone())
                .collect(),
        ));
        workflow
    }

    async fn run_step(
        &self,
        workflow_id: &str,
        step: &TaskStep,
        user_context: Option<Value>,
    ) -> Result<TaskResponse, CoordinatorError> {
        let reply_topic = format!(
            "coordinator.{}.replies.{}",
            self.coordinator_id.as_str(),
            step.id
        );
        let mut task_request = TaskRequest::new(step.capability.clone(), step.parameters.clone(), reply_topic)
            .with_priority(step.priority);
        if let Some(ctx) = user_context {
            task_request = task_request.with_user_context(ctx);
        }
        let task_id = task_request.task_id.clone();

        let wait = self.pending.register(task_id.clone(), self.task_timeout).await;

        let event = Event::with_correlation_id(
            task_topic(&step.capability),
            serde_json::to_value(&task_request).map_err(|e| CoordinatorError::InvalidPlan(e.to_string()))?,
            task_id.clone(),
        )
        .from_sender(self.coordinator_id.clone())
        .with_delivery(DeliveryOptions::reliable());

        self.broker
            .publish(event)
            .await
            .map_err(|e| CoordinatorError::InvalidPlan(e.to_string()))?;

        let _ = workflow_id;
        match wait.await {
            Ok(response) if response.success => Ok(response),
            Ok(response) => Err(CoordinatorError::StepFailed(
                response.error.unwrap_or_else(|| step.id.clone()),
            )),
            Err(PendingResponseError::Timeout) => Err(CoordinatorError::Timeout(step.id.clone())),
            Err(PendingResponseError::Cancelled) => Err(CoordinatorError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::event::AgentId as EventAgentId;
    use crate::planner::TaskStep;

    struct EchoResponder {
        broker: Arc<dyn Broker>,
        id: EventAgentId,
    }

    #[async_trait]
    impl EventSubscriber for EchoResponder {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            let req: TaskRequest = serde_json::from_value(event.payload).map_err(|e| e.to_string())?;
            let response = TaskResponse::ok(req.task_id, serde_json::json!({"echo": req.capability}), 1);
            let reply = Event::new(req.reply_topic, serde_json::to_value(&response).unwrap())
                .from_sender(self.id.clone());
            self.broker.publish(reply).await.map_err(|e| e.to_string())
        }
    }

    fn plan_two_sequential_steps() -> ExecutionPlan {
        ExecutionPlan {
            steps: vec![
                TaskStep {
                    id: "s1".to_string(),
                    capability: "general.answer".to_string(),
                    description: String::new(),
                    parameters: Value::Null,
                    priority: 0,
                    can_parallelize: false,
                },
                TaskStep {
                    id: "s2".to_string(),
                    capability: "general.answer".to_string(),
                    description: String::new(),
                    parameters: Value::Null,
                    priority: 0,
                    can_parallelize: false,
                },
            ],
            dependencies: [("s2".to_string(), vec!["s1".to_string()])].into_iter().collect(),
            reasoning: String::new(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn execute_respects_dependency_order_and_completes() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
        broker
            .subscribe(
                EventAgentId::new("responder"),
                "task.**",
                Arc::new(EchoResponder {
                    broker: broker.clone(),
                    id: EventAgentId::new("responder"),
                }),
            )
            .await
            .unwrap();

        let coordinator = WorkflowCoordinator::new(broker, false).await.unwrap();
        let workflow = coordinator
            .execute(plan_two_sequential_steps(), "do two things", None)
            .await;

        assert_eq!(workflow.state, WorkflowState::Completed);
        assert_eq!(workflow.results.len(), 2);
    }

    #[tokio::test]
    async fn execute_fails_when_no_responder_times_out() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
        let coordinator = WorkflowCoordinator::new(broker, true)
            .await
            .unwrap()
            .with_task_timeout(Duration::from_millis(50));

        let plan = ExecutionPlan {
            steps: vec![TaskStep {
                id: "s1".to_string(),
                capability: "nobody.home".to_string(),
                description: String::new(),
                parameters: Value::Null,
                priority: 0,
                can_parallelize: false,
            }],
            dependencies: HashMap::new(),
            reasoning: String::new(),
            confidence: 1.0,
        };

        let workflow = coordinator.execute(plan, "request", None).await;
        assert_eq!(workflow.state, WorkflowState::Failed);
    }
}
