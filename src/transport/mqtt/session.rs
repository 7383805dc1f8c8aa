//! MQTT transport session
//!
//! Owns the single physical connection to one region's broker: the rumqttc
//! client, the event-loop supervisor task and the connection state machine.
//! Incoming publishes are dispatched either to the pending-request table
//! (shadow accepted/rejected replies carrying a correlation token) or to the
//! event router (unsolicited device events).
//!
//! Lifecycle: Disconnected -> Connecting -> Connected -> { Interrupted ->
//! Connecting (auto-retry) | Disconnected (explicit) }. A connection break
//! fails every outstanding pending request immediately and drops
//! session-scoped subscriptions; durable listener subscriptions are kept in
//! memory and re-issued once the broker reports a fresh session.

use crate::auth::CredentialBundle;
use crate::config::MqttSection;
use crate::error::ApiError;
use crate::events::EventRouter;
use crate::protocol::envelope::client_token;
use crate::protocol::{ReplyDisposition, ResponseEnvelope, ShadowOperation, TopicBuilder};
use crate::transport::mqtt::options::{configure_mqtt_options, MqttEndpoint, ReconnectConfig};
use crate::transport::mqtt::pending::PendingRequestTable;
use crate::transport::mqtt::subscriptions::SubscriptionRegistry;
use crate::transport::{RequestTransport, TopicLink};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link lost; the supervisor is retrying with backoff
    Interrupted,
}

/// Waiters for broker SubAcks. Subscribes from the registry are serialized
/// by its lock, so acks arrive in issue order and a queue suffices.
#[derive(Default)]
struct AckWaiters {
    queue: Mutex<VecDeque<oneshot::Sender<Result<(), String>>>>,
}

impl AckWaiters {
    async fn register(&self) -> oneshot::Receiver<Result<(), String>> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().await.push_back(tx);
        rx
    }

    async fn complete_next(&self) {
        if let Some(waiter) = self.queue.lock().await.pop_front() {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn fail_all(&self, reason: &str) {
        let mut queue = self.queue.lock().await;
        while let Some(waiter) = queue.pop_front() {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

/// Raw topic operations backed by the live rumqttc client
struct SessionLink {
    client: Arc<Mutex<Option<AsyncClient>>>,
    acks: Arc<AckWaiters>,
    ack_timeout: Duration,
}

#[async_trait]
impl TopicLink for SessionLink {
    async fn subscribe(&self, topic: &str) -> Result<(), ApiError> {
        let client = {
            let guard = self.client.lock().await;
            guard
                .clone()
                .ok_or_else(|| ApiError::transport("subscribe while not connected"))?
        };

        let ack = self.acks.register().await;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ApiError::transport(format!("subscribe to {topic} failed: {e}")))?;

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ApiError::transport(format!(
                "subscribe to {topic} not acknowledged: {reason}"
            ))),
            Ok(Err(_)) => Err(ApiError::transport(format!(
                "subscribe to {topic} abandoned: session closed"
            ))),
            Err(_) => Err(ApiError::transport(format!(
                "no SubAck for {topic} within {}ms",
                self.ack_timeout.as_millis()
            ))),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ApiError> {
        let client = {
            let guard = self.client.lock().await;
            guard
                .clone()
                .ok_or_else(|| ApiError::transport("unsubscribe while not connected"))?
        };

        client
            .unsubscribe(topic)
            .await
            .map_err(|e| ApiError::transport(format!("unsubscribe from {topic} failed: {e}")))
    }
}

/// One broker connection per backend region
pub struct MqttSession {
    client_id: String,
    endpoint: MqttEndpoint,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    topics: TopicBuilder,
    client: Arc<Mutex<Option<AsyncClient>>>,
    acks: Arc<AckWaiters>,
    pending: Arc<PendingRequestTable>,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<EventRouter>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    credentials: Mutex<Option<CredentialBundle>>,
    // serializes connect attempts; waiters behind it observe the winner's
    // outcome through the state channel
    connect_guard: Mutex<()>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    pub fn new(client_id: &str, endpoint: MqttEndpoint, config: MqttSection) -> Arc<Self> {
        let client = Arc::new(Mutex::new(None));
        let acks = Arc::new(AckWaiters::default());
        let link = Arc::new(SessionLink {
            client: client.clone(),
            acks: acks.clone(),
            ack_timeout: config.ack_timeout(),
        });
        let registry = Arc::new(SubscriptionRegistry::new(link as Arc<dyn TopicLink>));
        let router = Arc::new(EventRouter::new(registry.clone()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Arc::new(Self {
            client_id: client_id.to_string(),
            topics: TopicBuilder::new(config.topic_prefix.clone()),
            endpoint,
            config,
            reconnect_config: ReconnectConfig::default(),
            client,
            acks,
            pending: Arc::new(PendingRequestTable::new()),
            registry,
            router,
            state_tx,
            state_rx,
            credentials: Mutex::new(None),
            connect_guard: Mutex::new(()),
            shutdown_tx: Mutex::new(None),
            supervisor: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Connect with the given credentials. Single-flight: a caller arriving
    /// while another connect is in progress waits for that outcome instead
    /// of racing its own handshake. Already connected is a no-op.
    pub async fn connect(&self, credentials: CredentialBundle) -> Result<(), ApiError> {
        let _guard = self.connect_guard.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.start_session(credentials).await
    }

    /// Tear the current connection down and connect with fresh credentials.
    /// Used after a credential refresh: the old session's grant is dead.
    pub async fn reconnect(&self, credentials: CredentialBundle) -> Result<(), ApiError> {
        let _guard = self.connect_guard.lock().await;
        info!(region = %self.endpoint.region, "reconnecting with fresh credentials");
        self.teardown("mqtt reconnecting").await;
        self.start_session(credentials).await
    }

    /// Explicit disconnect; durable listener registrations survive in
    /// memory for a later connect.
    pub async fn disconnect(&self) {
        let _guard = self.connect_guard.lock().await;
        self.teardown("mqtt disconnected").await;
        info!(region = %self.endpoint.region, "mqtt session disconnected");
    }

    async fn start_session(&self, credentials: CredentialBundle) -> Result<(), ApiError> {
        let _ = self.state_tx.send(ConnectionState::Connecting);

        let options =
            configure_mqtt_options(&self.client_id, &self.endpoint, &credentials, &self.config)?;
        let (client, event_loop) = AsyncClient::new(options, 10);
        *self.client.lock().await = Some(client);
        *self.credentials.lock().await = Some(credentials.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let supervisor = tokio::spawn(Self::supervise(
            SupervisorShared {
                client_id: self.client_id.clone(),
                endpoint: self.endpoint.clone(),
                config: self.config.clone(),
                reconnect_config: self.reconnect_config.clone(),
                topics: self.topics.clone(),
                client: self.client.clone(),
                acks: self.acks.clone(),
                pending: self.pending.clone(),
                registry: self.registry.clone(),
                router: self.router.clone(),
                state_tx: self.state_tx.clone(),
                credentials,
            },
            event_loop,
            shutdown_rx,
        ));
        *self.supervisor.lock().await = Some(supervisor);

        match self.await_connected(CONNECT_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown("mqtt connect failed").await;
                Err(e)
            }
        }
    }

    async fn teardown(&self, reason: &str) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }

        if let Some(handle) = self.supervisor.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("event loop task did not stop in time, aborting");
                // JoinHandle drop aborts nothing by itself; the shutdown
                // signal already fired, the task ends on its next poll
            }
        }

        self.acks.fail_all(reason).await;
        self.pending
            .fail_all(ResponseEnvelope::transport_failure(reason))
            .await;
        self.registry.drop_session_scoped().await;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    /// Wait until the state machine settles in Connected, or fail on
    /// Disconnected/Interrupted/timeout.
    async fn await_connected(&self, timeout: Duration) -> Result<(), ApiError> {
        let mut state_rx = self.state_rx.clone();

        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err(ApiError::transport("connect failed: disconnected"));
                    }
                    ConnectionState::Interrupted => {
                        return Err(ApiError::transport("connect failed: interrupted"));
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(ApiError::transport("connect failed: session dropped"));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ApiError::transport(format!(
                "no ConnAck within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Supervisor loop: polls the event loop, drives the state machine and
    /// recreates the connection with backoff after interruptions.
    async fn supervise(
        shared: SupervisorShared,
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(region = %shared.endpoint.region, "mqtt event loop started");
        let mut reconnect_attempts = 0u32;
        let mut was_connected = false;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            reconnect_attempts = 0;
                            shared
                                .handle_connected(was_connected, ack.session_present)
                                .await;
                            was_connected = true;
                        }
                        Ok(Event::Incoming(Packet::SubAck(_))) => {
                            shared.acks.complete_next().await;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let topic = String::from_utf8_lossy(&publish.topic).to_string();
                            shared.dispatch(&topic, &publish.payload).await;
                        }
                        Ok(Event::Incoming(Packet::Disconnect(_))) => {
                            shared.handle_interrupted("disconnected by broker").await;
                            if !Self::retry_connection(
                                &shared,
                                &mut event_loop,
                                &mut reconnect_attempts,
                                &mut shutdown_rx,
                            )
                            .await
                            {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            shared.handle_interrupted(&e.to_string()).await;
                            if !Self::retry_connection(
                                &shared,
                                &mut event_loop,
                                &mut reconnect_attempts,
                                &mut shutdown_rx,
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!(region = %shared.endpoint.region, "mqtt event loop stopped");
    }

    /// Back off, then replace the client and event loop for another attempt.
    /// Returns false when the supervisor should stop instead.
    async fn retry_connection(
        shared: &SupervisorShared,
        event_loop: &mut EventLoop,
        attempts: &mut u32,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        *attempts += 1;
        if !shared.reconnect_config.allows_attempt(*attempts) {
            error!("max reconnection attempts exceeded, giving up");
            let _ = shared.state_tx.send(ConnectionState::Disconnected);
            return false;
        }

        let delay = shared.reconnect_config.calculate_backoff_delay(*attempts);
        debug!(attempt = *attempts, delay_ms = delay, "scheduling reconnection");

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return false;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
        }
        if *shutdown_rx.borrow() {
            return false;
        }

        let options = match configure_mqtt_options(
            &shared.client_id,
            &shared.endpoint,
            &shared.credentials,
            &shared.config,
        ) {
            Ok(options) => options,
            Err(e) => {
                error!("cannot rebuild connection options: {e}");
                let _ = shared.state_tx.send(ConnectionState::Disconnected);
                return false;
            }
        };

        let (client, new_event_loop) = AsyncClient::new(options, 10);
        *shared.client.lock().await = Some(client);
        *event_loop = new_event_loop;
        let _ = shared.state_tx.send(ConnectionState::Connecting);
        true
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // best effort: the supervisor ends on its shutdown signal, but a
        // session dropped without disconnect() should not leak the task
        if let Ok(mut guard) = self.supervisor.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Everything the supervisor task shares with the session
struct SupervisorShared {
    client_id: String,
    endpoint: MqttEndpoint,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    topics: TopicBuilder,
    client: Arc<Mutex<Option<AsyncClient>>>,
    acks: Arc<AckWaiters>,
    pending: Arc<PendingRequestTable>,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<EventRouter>,
    state_tx: watch::Sender<ConnectionState>,
    credentials: CredentialBundle,
}

impl SupervisorShared {
    /// Entering Connected. A reconnect invalidates every in-flight
    /// correlation; durable topics are re-issued unless the broker resumed
    /// the previous session.
    async fn handle_connected(&self, was_connected: bool, session_present: bool) {
        info!(
            region = %self.endpoint.region,
            session_present,
            "mqtt connection established"
        );
        let _ = self.state_tx.send(ConnectionState::Connected);

        if was_connected {
            self.pending
                .fail_all(ResponseEnvelope::transport_failure("mqtt reconnected"))
                .await;
            self.registry.drop_session_scoped().await;
        }

        if !session_present {
            // run outside the supervisor so it can keep delivering the
            // SubAcks these subscribes wait on
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.resubscribe_durable().await {
                    error!("durable resubscription incomplete: {e}");
                }
            });
        }
    }

    /// Entering Interrupted: fail pending immediately rather than letting
    /// callers hang across the auto-reconnect.
    async fn handle_interrupted(&self, reason: &str) {
        warn!(region = %self.endpoint.region, "mqtt connection interrupted: {reason}");
        let _ = self.state_tx.send(ConnectionState::Interrupted);

        self.acks.fail_all("mqtt interrupted").await;
        let failed = self
            .pending
            .fail_all(ResponseEnvelope::transport_failure("mqtt interrupted"))
            .await;
        if failed > 0 {
            warn!("failed {failed} in-flight requests on interruption");
        }
        self.registry.drop_session_scoped().await;
    }

    /// Route one inbound publish: correlated shadow reply or unsolicited
    /// event.
    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        match self.topics.classify_reply(topic) {
            Some(reply) => {
                let Some(token) = client_token(payload) else {
                    warn!(topic, "shadow reply without client token dropped");
                    return;
                };

                let envelope = match reply.disposition {
                    ReplyDisposition::Accepted => {
                        ResponseEnvelope::from_accepted_payload(payload)
                    }
                    ReplyDisposition::Rejected => {
                        ResponseEnvelope::from_rejected_payload(payload)
                    }
                };
                let envelope = match envelope {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(topic, "undecodable shadow reply dropped: {e}");
                        return;
                    }
                };

                if !self.pending.complete(&token, envelope).await {
                    warn!(%token, topic, "shadow reply with unknown token");
                }
            }
            None => self.router.dispatch(topic, payload).await,
        }
    }
}

#[async_trait]
impl RequestTransport for MqttSession {
    async fn ensure_ready(&self) -> Result<(), ApiError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => self.await_connected(CONNECT_TIMEOUT).await,
            // fail fast rather than parking callers behind the auto-retry
            ConnectionState::Interrupted => {
                Err(ApiError::transport("mqtt interrupted; reconnect in progress"))
            }
            ConnectionState::Disconnected => {
                let credentials = self.credentials.lock().await.clone();
                match credentials {
                    Some(credentials) => self.connect(credentials).await,
                    None => Err(ApiError::transport("session has no credentials; login first")),
                }
            }
        }
    }

    async fn ensure_reply_pair(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<(), ApiError> {
        let accepted = self
            .topics
            .accepted_topic(thing_name, shadow_name, operation)
            .map_err(|e| ApiError::transport(e.to_string()))?;
        let rejected = self
            .topics
            .rejected_topic(thing_name, shadow_name, operation)
            .map_err(|e| ApiError::transport(e.to_string()))?;

        // request/response pairs are session-scoped: stale correlation
        // tokens are useless after a connection break
        self.registry.ensure_subscribed(&accepted, false).await?;
        self.registry.ensure_subscribed(&rejected, false).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: bytes::Bytes) -> Result<(), ApiError> {
        let client = {
            let guard = self.client.lock().await;
            guard
                .clone()
                .ok_or_else(|| ApiError::transport("publish while not connected"))?
        };

        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| ApiError::transport(format!("publish to {topic} failed: {e}")))
    }

    fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttSection;
    use serde_json::json;

    fn shared_for_tests() -> SupervisorShared {
        let config = MqttSection::default();
        let client = Arc::new(Mutex::new(None));
        let acks = Arc::new(AckWaiters::default());
        let link = Arc::new(SessionLink {
            client: client.clone(),
            acks: acks.clone(),
            ack_timeout: config.ack_timeout(),
        });
        let registry = Arc::new(SubscriptionRegistry::new(link as Arc<dyn TopicLink>));
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connecting);

        SupervisorShared {
            client_id: "client-1".to_string(),
            endpoint: MqttEndpoint {
                host: "broker.test".to_string(),
                region: "eu-central-1".to_string(),
            },
            config: config.clone(),
            reconnect_config: ReconnectConfig::default(),
            topics: TopicBuilder::new(config.topic_prefix),
            client,
            acks,
            pending: Arc::new(PendingRequestTable::new()),
            registry: registry.clone(),
            router: Arc::new(EventRouter::new(registry)),
            state_tx,
            credentials: CredentialBundle {
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: "session".to_string(),
                expires_at: chrono::Utc::now(),
                refresh_token: None,
            },
        }
    }

    #[tokio::test]
    async fn test_dispatch_completes_pending_on_accepted() {
        let shared = shared_for_tests();
        let receiver = shared
            .pending
            .register("tok-1", "SBS50A", "2nd_mainpage", ShadowOperation::Get)
            .await;

        let payload = json!({
            "clientToken": "tok-1",
            "state": {"reported": {"wifiRSSI": "-55"}}
        });
        shared
            .dispatch(
                "$aws/things/SBS50A/shadow/name/2nd_mainpage/get/accepted",
                payload.to_string().as_bytes(),
            )
            .await;

        let envelope = receiver.await.unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.body.unwrap()["wifiRSSI"], json!("-55"));
    }

    #[tokio::test]
    async fn test_dispatch_rejected_carries_broker_error() {
        let shared = shared_for_tests();
        let receiver = shared
            .pending
            .register("tok-1", "SBS50A", "2nd_mainpage", ShadowOperation::Get)
            .await;

        let payload = json!({"clientToken": "tok-1", "code": 404, "message": "no shadow"});
        shared
            .dispatch(
                "$aws/things/SBS50A/shadow/name/2nd_mainpage/get/rejected",
                payload.to_string().as_bytes(),
            )
            .await;

        let envelope = receiver.await.unwrap();
        assert_eq!(envelope.code, 404);
        assert_eq!(envelope.message, "no shadow");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_token_is_noop() {
        let shared = shared_for_tests();

        let payload = json!({"clientToken": "nobody", "state": {"reported": {}}});
        // must not panic or error
        shared
            .dispatch(
                "$aws/things/SBS50A/shadow/name/2nd_mainpage/get/accepted",
                payload.to_string().as_bytes(),
            )
            .await;
        assert!(shared.pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_handle_interrupted_fails_pending_and_drops_session_scoped() {
        let shared = shared_for_tests();
        let receiver = shared
            .pending
            .register("tok-1", "SBS50A", "2nd_mainpage", ShadowOperation::Get)
            .await;

        shared.handle_interrupted("connection reset").await;

        let envelope = receiver.await.unwrap();
        assert_eq!(envelope.code, crate::protocol::CODE_TRANSPORT);
        assert!(shared.pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_starts_disconnected() {
        let session = MqttSession::new(
            "client-1",
            MqttEndpoint {
                host: "broker.test".to_string(),
                region: "eu-central-1".to_string(),
            },
            MqttSection::default(),
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ensure_ready_without_credentials_fails() {
        let session = MqttSession::new(
            "client-1",
            MqttEndpoint {
                host: "broker.test".to_string(),
                region: "eu-central-1".to_string(),
            },
            MqttSection::default(),
        );
        let result = session.ensure_ready().await;
        assert!(matches!(result, Err(ApiError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_ack_waiters_complete_in_order() {
        let acks = AckWaiters::default();
        let first = acks.register().await;
        let second = acks.register().await;

        acks.complete_next().await;
        assert!(first.await.unwrap().is_ok());

        acks.fail_all("interrupted").await;
        assert!(second.await.unwrap().is_err());
    }
}
