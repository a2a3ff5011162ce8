//! In-memory pub/sub broker with hierarchical wildcard topic matching.
//!
//! Subscriptions are indexed in a [`TopicTrie`] keyed by dot-separated
//! segments so that `publish` can find every matching subscriber in
//! `O(segments)` time rather than scanning the whole subscription table.
//! Delivery itself happens off a bounded worker pool: `publish` returns once
//! every matching subscriber has been *scheduled*, not once handlers have
//! run to completion (spec §4.1).

use crate::error::BrokerError;
use crate::event::{AgentId, DeliveryMode, Event};
use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{sleep, Duration};

/// Receives events matched by a [`Broker`] subscription.
///
/// Mirrors the agent contract's `handleEvent` (spec §4.2): implementations
/// must not panic or block the calling worker; a failed handler is reported
/// back to the broker as `Err` and handled per the subscription's
/// [`DeliveryMode`], it never aborts delivery to other subscribers.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle one delivered event. Returning `Err` marks this delivery as
    /// failed for retry/drop purposes; it must never panic.
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// A registered `(agentId, topicPattern)` pair.
///
/// `*` matches exactly one segment, a terminal `**` matches zero or more
/// trailing segments. Wildcards must occupy a whole segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub agent_id: AgentId,
    pub pattern: String,
}

/// Validate that a pattern only uses wildcards as whole segments and that
/// `**` (if present) is the last segment.
pub fn validate_pattern(pattern: &str) -> Result<(), BrokerError> {
    if pattern.is_empty() {
        return Err(BrokerError::InvalidPattern(pattern.to_string()));
    }
    let segments: Vec<&str> = pattern.split('.').collect();
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            return Err(BrokerError::InvalidPattern(pattern.to_string()));
        }
        if *seg == "**" {
            if i != segments.len() - 1 {
                return Err(BrokerError::InvalidPattern(pattern.to_string()));
            }
            continue;
        }
        if *seg == "*" {
            continue;
        }
        if !seg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BrokerError::InvalidPattern(pattern.to_string()));
        }
    }
    Ok(())
}

/// Check whether `topic` is matched by `pattern`, applying the same wildcard
/// rules as the broker's subscription trie. Returns an error if `pattern`
/// itself is malformed (e.g. a non-terminal `**`).
pub fn topic_matches(pattern: &str, topic: &str) -> Result<bool, BrokerError> {
    validate_pattern(pattern)?;
    let pat: Vec<&str> = pattern.split('.').collect();
    let top: Vec<&str> = topic.split('.').collect();
    Ok(matches_rec(&pat, &top))
}

fn matches_rec(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((&"**", _)) => true,
        Some((&"*", rest)) => !topic.is_empty() && matches_rec(rest, &topic[1..]),
        Some((seg, rest)) => {
            !topic.is_empty() && topic[0] == *seg && matches_rec(rest, &topic[1..])
        }
    }
}

type SubscriptionId = u64;

#[derive(Default)]
struct TrieNode {
    literal: HashMap<String, TrieNode>,
    single: Option<Box<TrieNode>>,
    /// Subscription ids whose pattern ends exactly at this node.
    terminal: Vec<SubscriptionId>,
    /// Subscription ids whose pattern has a terminal `**` rooted here; matches
    /// this node and every descendant, including zero trailing segments.
    multi_terminal: Vec<SubscriptionId>,
}

/// A segment-indexed trie over subscription patterns, giving `O(segments)`
/// lookup for the set of subscribers matching a published topic.
#[derive(Default)]
struct TopicTrie {
    root: TrieNode,
}

impl TopicTrie {
    fn insert(&mut self, pattern: &str, id: SubscriptionId) {
        let segments: Vec<&str> = pattern.split('.').collect();
        Self::insert_rec(&mut self.root, &segments, id);
    }

    fn insert_rec(node: &mut TrieNode, segments: &[&str], id: SubscriptionId) {
        match segments.split_first() {
            None => node.terminal.push(id),
            Some((&"**", _)) => node.multi_terminal.push(id),
            Some((&"*", rest)) => {
                let child = node.single.get_or_insert_with(Box::default);
                Self::insert_rec(child, rest, id);
            }
            Some((seg, rest)) => {
                let child = node.literal.entry((*seg).to_string()).or_default();
                Self::insert_rec(child, rest, id);
            }
        }
    }

    /// Remove every occurrence of `id` from the trie rooted at `pattern`.
    /// Patterns are never numerous enough in practice to warrant a reverse
    /// index; a bounded walk down the inserted path is cheap.
    fn remove(&mut self, pattern: &str, id: SubscriptionId) {
        let segments: Vec<&str> = pattern.split('.').collect();
        Self::remove_rec(&mut self.root, &segments, id);
    }

    fn remove_rec(node: &mut TrieNode, segments: &[&str], id: SubscriptionId) {
        match segments.split_first() {
            None => node.terminal.retain(|&x| x != id),
            Some((&"**", _)) => node.multi_terminal.retain(|&x| x != id),
            Some((&"*", rest)) => {
                if let Some(child) = node.single.as_mut() {
                    Self::remove_rec(child, rest, id);
                }
            }
            Some((seg, rest)) => {
                if let Some(child) = node.literal.get_mut(*seg) {
                    Self::remove_rec(child, rest, id);
                }
            }
        }
    }

    fn matches(&self, topic: &str) -> Vec<SubscriptionId> {
        let segments: Vec<&str> = topic.split('.').collect();
        let mut out = Vec::new();
        Self::collect(&self.root, &segments, &mut out);
        out
    }

    fn collect(node: &TrieNode, topic: &[&str], out: &mut Vec<SubscriptionId>) {
        out.extend(node.multi_terminal.iter().copied());
        match topic.split_first() {
            None => out.extend(node.terminal.iter().copied()),
            Some((seg, rest)) => {
                if let Some(child) = node.literal.get(*seg) {
                    Self::collect(child, rest, out);
                }
                if let Some(child) = &node.single {
                    Self::collect(child, rest, out);
                }
            }
        }
    }
}

struct Registered {
    agent_id: AgentId,
    pattern: String,
    handler: Arc<dyn EventSubscriber>,
}

/// Public contract for a pub/sub event broker (spec §4.1).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(
        &self,
        agent_id: AgentId,
        pattern: &str,
        handler: Arc<dyn EventSubscriber>,
    ) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, agent_id: &AgentId, pattern: &str);

    async fn publish(&self, event: Event) -> Result<(), BrokerError>;

    async fn close(&self);
}

/// In-memory, in-process implementation of [`Broker`].
///
/// Deliveries run on a bounded pool of concurrent tasks gated by a
/// [`Semaphore`]: `publish` acquires one permit per matching subscriber
/// before spawning its delivery task, which provides the back-pressure
/// described in spec §4.1 (callers block once the pool is saturated).
pub struct InMemoryBroker {
    subscriptions: RwLock<HashMap<SubscriptionId, Registered>>,
    index: RwLock<(TopicTrie, HashMap<(AgentId, String), SubscriptionId>)>,
    next_id: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
    permits: Arc<Semaphore>,
}

const RETRY_BASE_MS: u64 = 100;
const RETRY_CAP_MS: u64 = 5_000;
const RETRY_MAX_TRIES: u32 = 5;

impl InMemoryBroker {
    /// Create a broker whose delivery worker pool allows up to
    /// `max_concurrent_deliveries` in-flight handler invocations at once.
    pub fn new(max_concurrent_deliveries: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            index: RwLock::new((TopicTrie::default(), HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: std::sync::atomic::AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(max_concurrent_deliveries.max(1))),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn subscribe(
        &self,
        agent_id: AgentId,
        pattern: &str,
        handler: Arc<dyn EventSubscriber>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::BrokerClosed);
        }
        validate_pattern(pattern)?;

        let key = (agent_id.clone(), pattern.to_string());
        let mut index = self.index.write().await;
        if index.1.contains_key(&key) {
            return Ok(()); // idempotent per (agentId, pattern)
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        index.0.insert(pattern, id);
        index.1.insert(key, id);
        drop(index);

        let mut subs = self.subscriptions.write().await;
        subs.insert(
            id,
            Registered {
                agent_id,
                pattern: pattern.to_string(),
                handler,
            },
        );
        Ok(())
    }

    async fn unsubscribe(&self, agent_id: &AgentId, pattern: &str) {
        let key = (agent_id.clone(), pattern.to_string());
        let mut index = self.index.write().await;
        if let Some(id) = index.1.remove(&key) {
            index.0.remove(pattern, id);
            drop(index);
            self.subscriptions.write().await.remove(&id);
        }
    }

    async fn publish(&self, event: Event) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::BrokerClosed);
        }
        if event.delivery_options.is_expired(Utc::now()) {
            return Ok(());
        }

        let matched_ids = self.index.read().await.0.matches(&event.topic);
        if matched_ids.is_empty() {
            return Ok(());
        }

        let subs = self.subscriptions.read().await;
        for id in matched_ids {
            let Some(reg) = subs.get(&id) else { continue };
            let handler = Arc::clone(&reg.handler);
            let event = event.clone();
            let permits = Arc::clone(&self.permits);

            // Acquire before spawning: this is the back-pressure point — once
            // the pool is saturated, publish blocks here until a slot frees up.
            let permit = permits
                .acquire_owned()
                .await
                .expect("semaphore is never closed");

            tokio::spawn(async move {
                let _permit = permit;
                deliver_with_retry(handler, event).await;
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

async fn deliver_with_retry(handler: Arc<dyn EventSubscriber>, event: Event) {
    if event.delivery_options.is_expired(Utc::now()) {
        return;
    }

    let reliable = matches!(event.delivery_options.mode, DeliveryMode::Reliable);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match handler.handle_event(event.clone()).await {
            Ok(()) => return,
            Err(msg) => {
                warn!(
                    "handler for topic '{}' failed (attempt {}): {}",
                    event.topic, attempt, msg
                );
                if !reliable || attempt >= RETRY_MAX_TRIES {
                    return;
                }
                let backoff = (RETRY_BASE_MS.saturating_mul(1 << (attempt - 1))).min(RETRY_CAP_MS);
                sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}
