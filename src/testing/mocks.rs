//! Mock transport, authenticator and HTTP backend
//!
//! The request-transport mock drives the real [`PendingRequestTable`] with
//! scripted broker replies, so engine tests cover the same correlation path
//! production uses.

use crate::auth::{AuthError, Authenticator, CredentialBundle};
use crate::error::ApiError;
use crate::events::EventListener;
use crate::protocol::envelope::client_token;
use crate::protocol::events::DeviceEvent;
use crate::protocol::{ResponseEnvelope, ShadowOperation};
use crate::transport::mqtt::PendingRequestTable;
use crate::transport::{RequestTransport, TopicLink};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Topic link recording every subscribe/unsubscribe
#[derive(Default)]
pub struct MockTopicLink {
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    fail: Mutex<bool>,
    subscribe_delay_ms: u64,
}

impl MockTopicLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        *self.fail.get_mut() = true;
        self
    }

    pub fn with_subscribe_delay(mut self, millis: u64) -> Self {
        self.subscribe_delay_ms = millis;
        self
    }

    pub async fn set_failure(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }

    pub async fn subscribe_calls(&self) -> Vec<String> {
        self.subscribes.lock().await.clone()
    }

    pub async fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribes.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.subscribes.lock().await.clear();
        self.unsubscribes.lock().await.clear();
    }
}

#[async_trait]
impl TopicLink for MockTopicLink {
    async fn subscribe(&self, topic: &str) -> Result<(), ApiError> {
        if self.subscribe_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.subscribe_delay_ms)).await;
        }
        if *self.fail.lock().await {
            return Err(ApiError::transport("mock subscribe failure"));
        }
        self.subscribes.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ApiError> {
        if *self.fail.lock().await {
            return Err(ApiError::transport("mock unsubscribe failure"));
        }
        self.unsubscribes.lock().await.push(topic.to_string());
        Ok(())
    }
}

/// Listener that records everything delivered to it
pub struct RecordingListener {
    identity: String,
    events: std::sync::Mutex<Vec<DeviceEvent>>,
}

impl RecordingListener {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventListener for RecordingListener {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn on_event(&self, event: DeviceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Scripted broker behavior per publish
#[derive(Debug, Clone)]
enum ReplyScript {
    /// Broker stays silent; the caller runs into its timeout
    Silence,
    /// Accepted reply wrapping this body
    Success(Value),
    /// Rejected reply with code/message
    Error(i64, String),
    /// Accepted reply whose body echoes the correlation token and the
    /// published desired state, for cross-talk tests
    TokenEcho,
}

/// Request transport driving the real pending table with scripted replies
pub struct MockRequestTransport {
    pending: PendingRequestTable,
    calls: Mutex<Vec<String>>,
    script: ReplyScript,
    /// Per-publish delays before the scripted reply lands, cycled; empty
    /// means immediate.
    reply_delays_ms: Vec<u64>,
    publish_counter: AtomicUsize,
    publish_fails: bool,
    connect_fails: bool,
    /// Deliver every scripted reply twice, to exercise exactly-once
    /// completion under late duplicates.
    duplicate_replies: bool,
}

impl MockRequestTransport {
    pub fn new() -> Self {
        Self {
            pending: PendingRequestTable::new(),
            calls: Mutex::new(Vec::new()),
            script: ReplyScript::Silence,
            reply_delays_ms: Vec::new(),
            publish_counter: AtomicUsize::new(0),
            publish_fails: false,
            connect_fails: false,
            duplicate_replies: false,
        }
    }

    pub fn with_success_reply(mut self, body: Value) -> Self {
        self.script = ReplyScript::Success(body);
        self
    }

    pub fn with_error_reply(mut self, code: i64, message: &str) -> Self {
        self.script = ReplyScript::Error(code, message.to_string());
        self
    }

    pub fn with_token_echo_reply(mut self) -> Self {
        self.script = ReplyScript::TokenEcho;
        self
    }

    pub fn with_reply_delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.reply_delays_ms = delays_ms;
        self
    }

    pub fn with_publish_failure(mut self) -> Self {
        self.publish_fails = true;
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    pub fn with_duplicate_replies(mut self) -> Self {
        self.duplicate_replies = true;
        self
    }

    pub async fn call_order(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockRequestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestTransport for MockRequestTransport {
    async fn ensure_ready(&self) -> Result<(), ApiError> {
        if self.connect_fails {
            return Err(ApiError::transport("mock connect failure"));
        }
        Ok(())
    }

    async fn ensure_reply_pair(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<(), ApiError> {
        self.calls
            .lock()
            .await
            .push(format!("ensure_reply_pair {thing_name}/{shadow_name}/{operation}"));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: bytes::Bytes) -> Result<(), ApiError> {
        if self.publish_fails {
            return Err(ApiError::transport("mock publish failure"));
        }
        self.calls.lock().await.push(format!("publish {topic}"));

        let Some(token) = client_token(&payload) else {
            return Ok(());
        };
        let envelope = match &self.script {
            ReplyScript::Silence => return Ok(()),
            ReplyScript::Success(body) => ResponseEnvelope::success(Some(body.clone())),
            ReplyScript::Error(code, message) => ResponseEnvelope::error(*code, message.clone()),
            ReplyScript::TokenEcho => {
                let parsed: Value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
                let desired = parsed
                    .get("state")
                    .and_then(|state| state.get("desired"))
                    .cloned()
                    .unwrap_or(Value::Null);
                ResponseEnvelope::success(Some(serde_json::json!({
                    "echo": token,
                    "desired": desired,
                })))
            }
        };

        let delay = if self.reply_delays_ms.is_empty() {
            0
        } else {
            let index = self.publish_counter.fetch_add(1, Ordering::SeqCst);
            self.reply_delays_ms[index % self.reply_delays_ms.len()]
        };

        // deliver like the broker would: concurrently, after the publish
        // call already returned
        let pending = self.pending.clone();
        let duplicate = self.duplicate_replies;
        tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            pending.complete(&token, envelope.clone()).await;
            if duplicate {
                tokio::time::sleep(Duration::from_millis(5)).await;
                pending.complete(&token, envelope).await;
            }
        });
        Ok(())
    }

    fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }
}

/// Authenticator with counters and scripted failures
pub struct MockAuthenticator {
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    expires_in_secs: i64,
    fail_login: bool,
    fail_refresh: bool,
}

impl MockAuthenticator {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            expires_in_secs: 3600,
            fail_login: false,
            fail_refresh: false,
        }
    }

    /// Bundles that are immediately inside the refresh margin
    pub fn with_short_expiry(mut self, secs: i64) -> Self {
        self.expires_in_secs = secs;
        self
    }

    pub fn with_login_failure(mut self) -> Self {
        self.fail_login = true;
        self
    }

    pub fn with_refresh_failure(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    fn bundle(&self, refresh_token: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            access_key_id: "AKIA_MOCK".to_string(),
            secret_access_key: "mock-secret".to_string(),
            session_token: "mock-session".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in_secs),
            refresh_token: refresh_token.map(str::to_string),
        }
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn login(&self, _username: &str, _password: &str) -> Result<CredentialBundle, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_login {
            return Err(AuthError::LoginRejected("mock login failure".to_string()));
        }
        Ok(self.bundle(Some("mock-refresh-token")))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<CredentialBundle, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(AuthError::RefreshRejected(
                "mock refresh failure".to_string(),
            ));
        }
        Ok(self.bundle(None))
    }
}

/// HTTP backend replaying canned raw responses in order
#[derive(Default)]
pub struct MockHttpBackend {
    responses: Mutex<std::collections::VecDeque<String>>,
    pub requests: Mutex<Vec<Value>>,
}

impl MockHttpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, raw: &str) {
        self.responses.lock().await.push_back(raw.to_string());
    }

    pub async fn request_bodies(&self) -> Vec<Value> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl crate::api::HttpBackend for MockHttpBackend {
    async fn post(&self, body: Value, _access_token: Option<&str>) -> Result<String, ApiError> {
        self.requests.lock().await.push(body);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ApiError::transport("mock http backend: no canned response"))
    }
}
