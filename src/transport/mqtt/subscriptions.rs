//! Topic subscription registry
//!
//! Tracks which topics the session currently holds on the broker. All
//! mutations serialize through one lock, and the subscribe network call
//! happens while holding it: two callers racing for the same topic cannot
//! both reach the broker, so idempotency comes from serialization rather
//! than dedup-after-the-fact.
//!
//! Durable topics (event listeners) survive a reconnect and are re-issued
//! after the broker reports a fresh session. Session-scoped topics (the
//! accepted/rejected pairs of request/response round trips) are dropped on a
//! connection break - their correlation tokens are one-shot and stale once
//! the link died.

use crate::error::ApiError;
use crate::transport::TopicLink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct TopicRecord {
    durable: bool,
    /// Interested listeners for durable topics; session-scoped records keep
    /// this at zero and are removed wholesale on disconnect.
    listener_refs: usize,
}

/// Registry of currently subscribed topics
pub struct SubscriptionRegistry {
    link: Arc<dyn TopicLink>,
    topics: Mutex<HashMap<String, TopicRecord>>,
}

impl SubscriptionRegistry {
    pub fn new(link: Arc<dyn TopicLink>) -> Self {
        Self {
            link,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a topic unless already held.
    ///
    /// The broker call runs under the registry lock so concurrent callers
    /// serialize; the loser of the race finds the record present and
    /// no-ops. A durable request upgrades an existing session-scoped record.
    pub async fn ensure_subscribed(&self, topic: &str, durable: bool) -> Result<(), ApiError> {
        let mut topics = self.topics.lock().await;

        if let Some(record) = topics.get_mut(topic) {
            if durable {
                record.durable = true;
            }
            return Ok(());
        }

        self.link.subscribe(topic).await?;
        debug!(topic, durable, "subscribed");
        topics.insert(
            topic.to_string(),
            TopicRecord {
                durable,
                listener_refs: 0,
            },
        );
        Ok(())
    }

    /// Record one more listener interested in a durable topic
    pub async fn retain(&self, topic: &str) {
        if let Some(record) = self.topics.lock().await.get_mut(topic) {
            record.listener_refs += 1;
        }
    }

    /// Drop one listener reference; the last one out unsubscribes.
    ///
    /// Teardown is not safety-critical: a failed unsubscribe is logged and
    /// forgotten, the record is removed either way.
    pub async fn release(&self, topic: &str) {
        let mut topics = self.topics.lock().await;

        let Some(record) = topics.get_mut(topic) else {
            return;
        };
        record.listener_refs = record.listener_refs.saturating_sub(1);
        if record.listener_refs > 0 {
            return;
        }

        topics.remove(topic);
        if let Err(e) = self.link.unsubscribe(topic).await {
            warn!(topic, "unsubscribe failed: {e}");
        } else {
            debug!(topic, "unsubscribed");
        }
    }

    /// Topics to re-issue after a reconnect with no resumed session
    pub async fn durable_topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .await
            .iter()
            .filter(|(_, record)| record.durable)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Re-issue every durable subscription; called once after each
    /// successful (re)connect that did not resume a session.
    pub async fn resubscribe_durable(&self) -> Result<(), ApiError> {
        let topics = self.topics.lock().await;
        let mut first_error = None;

        for (topic, record) in topics.iter() {
            if !record.durable {
                continue;
            }
            if let Err(e) = self.link.subscribe(topic).await {
                warn!(%topic, "resubscribe failed: {e}");
                first_error.get_or_insert(e);
            } else {
                debug!(%topic, "resubscribed");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forget session-scoped records after a connection break; no network
    /// calls, the broker side died with the session.
    pub async fn drop_session_scoped(&self) -> usize {
        let mut topics = self.topics.lock().await;
        let before = topics.len();
        topics.retain(|_, record| record.durable);
        before - topics.len()
    }

    /// Forget everything (logout teardown)
    pub async fn clear(&self) {
        self.topics.lock().await.clear();
    }

    pub async fn contains(&self, topic: &str) -> bool {
        self.topics.lock().await.contains_key(topic)
    }

    pub async fn len(&self) -> usize {
        self.topics.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.topics.lock().await.is_empty()
    }
}
