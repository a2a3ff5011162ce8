//! Task request/response protocol (spec §4.4).
//!
//! Requests are published on `task.<capability>`; the handling agent
//! replies on the request's `reply_topic`, copying `task_id` across so the
//! requester can correlate the response via [`PendingResponses`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Topic a task request for `capability` is published on.
pub fn task_topic(capability: &str) -> String {
    format!("task.{}", capability)
}

/// Payload of a `task.<capability>` request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub capability: String,
    pub parameters: Value,
    pub user_context: Option<Value>,
    /// Higher runs first among ready, sequentially-scheduled steps.
    pub priority: u8,
    pub deadline: Option<DateTime<Utc>>,
    /// Topic the handling agent must publish its [`TaskResponse`] on.
    pub reply_topic: String,
}

impl TaskRequest {
    pub fn new(capability: impl Into<String>, parameters: Value, reply_topic: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            capability: capability.into(),
            parameters,
            user_context: None,
            priority: 0,
            deadline: None,
            reply_topic: reply_topic.into(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_user_context(mut self, user_context: Value) -> Self {
        self.user_context = Some(user_context);
        self
    }
}

/// Payload of the response published on a [`TaskRequest::reply_topic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl TaskResponse {
    pub fn ok(task_id: impl Into<String>, result: Value, latency_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            result: Some(result),
            error: None,
            latency_ms,
        }
    }

    pub fn err(task_id: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Registry of in-flight requests awaiting a correlated [`TaskResponse`].
///
/// A requester calls [`PendingResponses::register`] before publishing its
/// request and awaits the returned future; whoever observes the matching
/// response (keyed by `task_id`) calls [`PendingResponses::complete`].
#[derive(Default, Clone)]
pub struct PendingResponses {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<TaskResponse>>>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `task_id`, returning a future that resolves once
    /// [`complete`](Self::complete) is called or `deadline` elapses.
    pub async fn register(
        &self,
        task_id: String,
        deadline: Duration,
    ) -> impl std::future::Future<Output = Result<TaskResponse, PendingResponseError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(task_id.clone(), tx);
        let inner = self.inner.clone();
        async move {
            let result = timeout(deadline, rx).await;
            inner.lock().await.remove(&task_id);
            match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(PendingResponseError::Cancelled),
                Err(_) => Err(PendingResponseError::Timeout),
            }
        }
    }

    /// Deliver `response` to whoever is waiting on its `task_id`. A response
    /// with no matching waiter (already timed out, or unsolicited) is dropped.
    pub async fn complete(&self, response: TaskResponse) {
        if let Some(tx) = self.inner.lock().await.remove(&response.task_id) {
            let _ = tx.send(response);
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingResponseError {
    Timeout,
    Cancelled,
}

impl std::fmt::Display for PendingResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingResponseError::Timeout => write!(f, "task response timed out"),
            PendingResponseError::Cancelled => write!(f, "task response channel was cancelled"),
        }
    }
}

impl std::error::Error for PendingResponseError {}
