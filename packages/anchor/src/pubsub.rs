//! Event subscriptions backing the `@join` and `@leave` kinds.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::element::Element;
use crate::lock;
use crate::value::Value;

/// Fan-out source of events.
///
/// Subscribers are held weakly; a scrubbed or dropped subscription simply
/// stops receiving.
pub struct Publisher {
    source: String,
    kind: String,
    subscribers: Mutex<Vec<Weak<Subscription>>>,
}

impl Publisher {
    /// `source` names the event stream, `kind` is the element kind that
    /// subscriptions report.
    pub fn new(source: &str, kind: &str) -> Self {
        Publisher {
            source: source.to_string(),
            kind: kind.to_string(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Arc<Subscription> {
        let sub = Arc::new(Subscription {
            source: self.source.clone(),
            kind: self.kind.clone(),
            state: Mutex::new(SubState::default()),
            notify: Notify::new(),
        });
        lock(&self.subscribers).push(Arc::downgrade(&sub));
        sub
    }

    /// Deliver an event to every live subscriber. Returns how many got it.
    pub fn publish(&self, event: Value) -> usize {
        let live: Vec<Arc<Subscription>> = {
            let mut subs = lock(&self.subscribers);
            subs.retain(|w| w.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        live.iter().filter(|s| s.push(event.clone())).count()
    }

    /// Close every subscriber; pending events stay consumable.
    pub fn close(&self) {
        let subs = std::mem::take(&mut *lock(&self.subscribers));
        for sub in subs.iter().filter_map(Weak::upgrade) {
            sub.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// Events a subscription holds before the oldest are discarded.
pub const SUBSCRIPTION_BACKLOG: usize = 1024;

#[derive(Default)]
struct SubState {
    queue: VecDeque<Value>,
    dropped: u64,
    closed: bool,
}

/// Status reported by a subscription's peek.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubscriptionStat {
    pub source: String,
    pub pending: usize,
    /// Events discarded because the backlog was full.
    pub dropped: u64,
    pub closed: bool,
}

/// A live queue of events from one publisher.
pub struct Subscription {
    source: String,
    kind: String,
    state: Mutex<SubState>,
    notify: Notify,
}

impl Subscription {
    fn push(&self, event: Value) -> bool {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return false;
            }
            if state.queue.len() >= SUBSCRIPTION_BACKLOG {
                state.queue.pop_front();
                state.dropped += 1;
                debug!(
                    source = %self.source,
                    dropped = state.dropped,
                    "subscription backlog full"
                );
            }
            state.queue.push_back(event);
        }
        self.notify.notify_waiters();
        true
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.notify.notify_waiters();
    }

    /// Wait for the next event. `None` once the subscription is closed and
    /// drained.
    pub async fn consume(&self) -> Option<Value> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                if let Some(event) = state.queue.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn peek(&self) -> SubscriptionStat {
        let state = lock(&self.state);
        SubscriptionStat {
            source: self.source.clone(),
            pending: state.queue.len(),
            dropped: state.dropped,
            closed: state.closed,
        }
    }
}

#[async_trait]
impl Element for Subscription {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn scrub(&self) {
        {
            let mut state = lock(&self.state);
            state.closed = true;
            state.queue.clear();
        }
        self.notify.notify_waiters();
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.peek()).unwrap_or_default()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn events_after_subscribe_are_delivered() {
        let publisher = Publisher::new("join", "@join");
        assert_eq!(publisher.publish(Value::from("early")), 0);

        let sub = publisher.subscribe();
        assert_eq!(publisher.publish(Value::from("a")), 1);
        assert_eq!(publisher.publish(Value::from("b")), 1);

        assert_eq!(sub.consume().await, Some(Value::from("a")));
        assert_eq!(sub.consume().await, Some(Value::from("b")));
        assert_eq!(sub.peek().pending, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consume_waits_for_publish() {
        let publisher = Arc::new(Publisher::new("leave", "@leave"));
        let sub = publisher.subscribe();

        let waiter = tokio::spawn({
            let sub = Arc::clone(&sub);
            async move { sub.consume().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(Value::from("X1"));

        assert_eq!(waiter.await.unwrap(), Some(Value::from("X1")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scrub_releases_consumer() {
        let publisher = Publisher::new("join", "@join");
        let sub = publisher.subscribe();

        let waiter = tokio::spawn({
            let sub = Arc::clone(&sub);
            async move { sub.consume().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.scrub().await;

        assert_eq!(waiter.await.unwrap(), None);
        assert!(sub.peek().closed);
        assert_eq!(publisher.publish(Value::Null), 0);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let publisher = Publisher::new("join", "@join");
        let sub = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_keeps_pending() {
        let publisher = Publisher::new("join", "@join");
        let sub = publisher.subscribe();
        publisher.publish(Value::from(1i64));
        publisher.close();
        assert_eq!(sub.consume().await, Some(Value::from(1i64)));
        assert_eq!(sub.consume().await, None);
    }

    #[tokio::test]
    async fn slow_consumer_loses_oldest_events() {
        let publisher = Publisher::new("join", "@join");
        let sub = publisher.subscribe();
        let extra = 10;
        for i in 0..(SUBSCRIPTION_BACKLOG + extra) as i64 {
            assert_eq!(publisher.publish(Value::from(i)), 1);
        }

        let stat = sub.peek();
        assert_eq!(stat.pending, SUBSCRIPTION_BACKLOG);
        assert_eq!(stat.dropped, extra as u64);
        assert_eq!(sub.consume().await, Some(Value::from(extra as i64)));

        publisher.publish(Value::from("tail"));
        assert_eq!(sub.peek().pending, SUBSCRIPTION_BACKLOG);
        assert_eq!(sub.peek().dropped, extra as u64);
    }

    #[tokio::test]
    async fn peek_bytes_is_json() {
        let publisher = Publisher::new("join", "@join");
        let sub = publisher.subscribe();
        publisher.publish(Value::Null);
        let stat: serde_json::Value = serde_json::from_slice(&sub.peek_bytes().await).unwrap();
        assert_eq!(stat["source"], "join");
        assert_eq!(stat["pending"], 1);
        assert_eq!(stat["dropped"], 0);
        assert_eq!(stat["closed"], false);
    }
}
