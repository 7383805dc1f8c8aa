//! Event fan-out router
//!
//! Inbound unsolicited messages are matched against every registered
//! subscription key with the same topic. The payload is decoded once per
//! key - the decoder is fixed by the key's event kind at registration time -
//! and each decoded event is delivered to the listeners whose identity
//! matches the event's target. Listeners with an empty identity receive
//! every event under their key (account-wide notices like forced logout).
//!
//! The router is instance-owned state with its lifecycle tied to the owning
//! session; nothing here is process-global.

use crate::protocol::events::{DeviceEvent, EventKind};
use crate::transport::mqtt::SubscriptionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Identifies one decoded channel: a topic and the event kind decoded on it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub topic: String,
    pub kind: EventKind,
}

impl SubscriptionKey {
    pub fn new(topic: impl Into<String>, kind: EventKind) -> Self {
        Self {
            topic: topic.into(),
            kind,
        }
    }
}

/// Receiver of decoded device events
pub trait EventListener: Send + Sync {
    /// Identity this listener is interested in (station+sensor serial);
    /// empty receives all events under its key.
    fn identity(&self) -> &str;

    fn on_event(&self, event: DeviceEvent);
}

/// Per-session listener registry and dispatcher
pub struct EventRouter {
    registry: Arc<SubscriptionRegistry>,
    listeners: Mutex<HashMap<SubscriptionKey, Vec<Arc<dyn EventListener>>>>,
}

impl EventRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a listener under a key, subscribing the topic (durable) on
    /// first interest.
    pub async fn register(
        &self,
        key: SubscriptionKey,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), crate::error::ApiError> {
        self.registry.ensure_subscribed(&key.topic, true).await?;
        self.registry.retain(&key.topic).await;

        let mut listeners = self.listeners.lock().await;
        listeners.entry(key.clone()).or_default().push(listener);
        debug!(topic = %key.topic, kind = ?key.kind, "registered event listener");
        Ok(())
    }

    /// Remove a listener everywhere it is registered. Keys left without
    /// listeners release their topic subscription.
    pub async fn unregister(&self, listener: &Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock().await;
        let mut emptied = Vec::new();

        for (key, registered) in listeners.iter_mut() {
            let before = registered.len();
            registered.retain(|candidate| !Arc::ptr_eq(candidate, listener));
            if registered.len() < before {
                debug!(topic = %key.topic, "unregistered event listener");
            }
            if registered.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in emptied {
            listeners.remove(&key);
            self.registry.release(&key.topic).await;
        }
    }

    /// Dispatch one inbound message to every matching key.
    ///
    /// A decode failure skips that key only; other keys and listeners still
    /// receive their deliveries.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let matches: Vec<(SubscriptionKey, Vec<Arc<dyn EventListener>>)> = {
            let listeners = self.listeners.lock().await;
            listeners
                .iter()
                .filter(|(key, _)| key.topic == topic)
                .map(|(key, registered)| (key.clone(), registered.clone()))
                .collect()
        };

        for (key, registered) in matches {
            let events = match key.kind.decode(payload) {
                Ok(events) => events,
                Err(e) => {
                    warn!(topic, "dropping undecodable event payload: {e}");
                    continue;
                }
            };

            for event in events {
                for listener in &registered {
                    let identity = listener.identity();
                    if identity.is_empty() || identity == event.target {
                        listener.on_event(event.clone());
                    }
                }
            }
        }
    }

    /// Drop all listener registrations (logout teardown)
    pub async fn clear(&self) {
        self.listeners.lock().await.clear();
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockTopicLink, RecordingListener};
    use crate::transport::TopicLink;
    use serde_json::json;

    fn router_with_link() -> (EventRouter, Arc<MockTopicLink>) {
        let link = Arc::new(MockTopicLink::new());
        let registry = Arc::new(SubscriptionRegistry::new(link.clone() as Arc<dyn TopicLink>));
        (EventRouter::new(registry), link)
    }

    fn alarm_payload(station: &str, sensor: &str, is_alarm: bool) -> Vec<u8> {
        json!({
            "state": {"reported": {
                sensor: {
                    "stationSN": station,
                    "deviceSN": sensor,
                    "isAlarm": if is_alarm { "1" } else { "0" },
                }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_identity() {
        let (router, _link) = router_with_link();
        let topic = "$aws/things/SBS50A/shadow/name/2nd_safealarm/update";
        let key = SubscriptionKey::new(topic, EventKind::Alarm);

        let for_x = Arc::new(RecordingListener::new("STAX"));
        let for_y = Arc::new(RecordingListener::new("STAY"));
        let account_wide = Arc::new(RecordingListener::new(""));
        for listener in [&for_x, &for_y, &account_wide] {
            router
                .register(key.clone(), listener.clone() as Arc<dyn EventListener>)
                .await
                .unwrap();
        }

        router.dispatch(topic, &alarm_payload("STA", "X", true)).await;

        assert_eq!(for_x.events().len(), 1);
        assert_eq!(for_y.events().len(), 0);
        assert_eq!(account_wide.events().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_other_topics() {
        let (router, _link) = router_with_link();
        let key = SubscriptionKey::new("topic/a", EventKind::Alarm);
        let listener = Arc::new(RecordingListener::new(""));
        router
            .register(key, listener.clone() as Arc<dyn EventListener>)
            .await
            .unwrap();

        router
            .dispatch("topic/b", &alarm_payload("STA", "X", true))
            .await;
        assert!(listener.events().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_skips_only_that_key() {
        let (router, _link) = router_with_link();
        let topic = "shared/topic";
        let logout_listener = Arc::new(RecordingListener::new(""));
        let alarm_listener = Arc::new(RecordingListener::new(""));
        router
            .register(
                SubscriptionKey::new(topic, EventKind::Logout),
                logout_listener.clone() as Arc<dyn EventListener>,
            )
            .await
            .unwrap();
        router
            .register(
                SubscriptionKey::new(topic, EventKind::Alarm),
                alarm_listener.clone() as Arc<dyn EventListener>,
            )
            .await
            .unwrap();

        // valid alarm body but not a logout body: the logout key fails to
        // decode, the alarm key still delivers
        router.dispatch(topic, &alarm_payload("STA", "X", true)).await;

        assert!(logout_listener.events().is_empty());
        assert_eq!(alarm_listener.events().len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_releases_topic() {
        let (router, link) = router_with_link();
        let key = SubscriptionKey::new("topic/a", EventKind::Alarm);
        let listener = Arc::new(RecordingListener::new("X"));
        let listener_dyn = listener.clone() as Arc<dyn EventListener>;
        router.register(key, listener_dyn.clone()).await.unwrap();

        router.unregister(&listener_dyn).await;

        assert_eq!(router.listener_count().await, 0);
        assert_eq!(link.unsubscribe_calls().await, vec!["topic/a".to_string()]);
    }

    #[tokio::test]
    async fn test_shared_topic_kept_until_last_listener_leaves() {
        let (router, link) = router_with_link();
        let key = SubscriptionKey::new("topic/a", EventKind::Alarm);
        let first = Arc::new(RecordingListener::new("X")) as Arc<dyn EventListener>;
        let second = Arc::new(RecordingListener::new("Y")) as Arc<dyn EventListener>;
        router.register(key.clone(), first.clone()).await.unwrap();
        router.register(key, second.clone()).await.unwrap();

        router.unregister(&first).await;
        assert!(link.unsubscribe_calls().await.is_empty());

        router.unregister(&second).await;
        assert_eq!(link.unsubscribe_calls().await.len(), 1);
    }
}
