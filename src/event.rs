//! The event envelope carried across the [`Broker`](crate::broker::Broker).
//!
//! An [`Event`] is the single message type flowing through the mesh: task
//! requests, task responses, and any ad-hoc notification an agent chooses to
//! publish all use this envelope, distinguished only by `topic` and the
//! shape of `payload`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque agent identity with a stable string form.
///
/// Equality and hashing are by the wrapped string; two `AgentId`s are equal
/// iff their string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Wrap an arbitrary string-like value as an agent identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, randomly-assigned identity (used for synthetic agents).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the stable string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Delivery semantics requested for a single [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Retried with bounded exponential backoff (base 100ms, cap 5s, up to 5
    /// tries) if the handler errors.
    Reliable,
    /// Dropped on the first handler error; no retry.
    BestEffort,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::BestEffort
    }
}

/// Delivery options attached to an [`Event`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Retry/drop policy on handler failure.
    pub mode: DeliveryMode,
    /// If set and exceeded before dispatch, the broker skips delivery to
    /// that subscriber entirely.
    pub expires_at: Option<DateTime<Utc>>,
}

impl DeliveryOptions {
    /// Best-effort delivery with no expiry (the default).
    pub fn best_effort() -> Self {
        Self {
            mode: DeliveryMode::BestEffort,
            expires_at: None,
        }
    }

    /// Reliable delivery (retried on handler failure) with no expiry.
    pub fn reliable() -> Self {
        Self {
            mode: DeliveryMode::Reliable,
            expires_at: None,
        }
    }

    /// Attach an expiry to this delivery policy (builder pattern).
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now > e).unwrap_or(false)
    }
}

/// An immutable message published on the [`Broker`](crate::broker::Broker).
///
/// `topic` is a dot-separated hierarchical path (segments `[A-Za-z0-9_-]`),
/// matched against subscriber patterns by [`crate::broker::topic_matches`].
/// `correlation_id` threads a request through to its response: the same id
/// flows from a `task.<capability>` request to the reply published on
/// `reply_topic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated hierarchical topic, e.g. `"task.weather.current"`.
    pub topic: String,
    /// Opaque structured payload (map-of-string-to-any in wire form).
    pub payload: Value,
    /// Originating agent, if any. Synthetic events (e.g. timer ticks) may omit it.
    pub sender: Option<AgentId>,
    /// Unique per request; flows unchanged from a task request to its response.
    pub correlation_id: String,
    /// Retry/expiry policy for this specific publish.
    pub delivery_options: DeliveryOptions,
    /// Monotonic UTC wall-clock timestamp set at construction.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build a new event with a fresh, random `correlation_id` and the current
    /// timestamp. Use [`Event::with_correlation_id`] to correlate a response
    /// with a prior request instead.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            sender: None,
            correlation_id: Uuid::new_v4().to_string(),
            delivery_options: DeliveryOptions::default(),
            timestamp: Utc::now(),
        }
    }

    /// Build an event whose `correlation_id` is supplied by the caller — the
    /// mechanism that lets a task-response share its requesting task's id.
    pub fn with_correlation_id(
        topic: impl Into<String>,
        payload: Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            sender: None,
            correlation_id: correlation_id.into(),
            delivery_options: DeliveryOptions::default(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a sender identity (builder pattern).
    pub fn from_sender(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Override the delivery options (builder pattern).
    pub fn with_delivery(mut self, options: DeliveryOptions) -> Self {
        self.delivery_options = options;
        self
    }

    /// Topic segments split on `.`, used by the broker's matcher.
    pub fn topic_segments(&self) -> Vec<&str> {
        self.topic.split('.').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_equality_is_by_string() {
        assert_eq!(AgentId::new("weather-1"), AgentId::from("weather-1"));
        assert_ne!(AgentId::new("weather-1"), AgentId::new("weather-2"));
    }

    #[test]
    fn event_preserves_correlation_id() {
        let e = Event::with_correlation_id("task.weather.current", Value::Null, "corr-1");
        assert_eq!(e.correlation_id, "corr-1");
    }

    #[test]
    fn topic_segments_split_on_dot() {
        let e = Event::new("a.b.c", Value::Null);
        assert_eq!(e.topic_segments(), vec!["a", "b", "c"]);
    }
}
