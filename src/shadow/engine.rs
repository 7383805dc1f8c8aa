//! Shadow request/response engine
//!
//! Turns a domain "get shadow" / "update shadow" call into the two-phase
//! protocol on top of publish/subscribe: subscribe the accepted/rejected
//! reply pair, publish the request tagged with a fresh correlation token,
//! then await the completion slot bounded by a timeout.
//!
//! Subscribe-before-publish ordering is mandatory per request: publishing
//! before the reply pair is acknowledged can lose the response.

use crate::error::ApiError;
use crate::protocol::{ResponseEnvelope, ShadowOperation, TopicBuilder};
use crate::transport::RequestTransport;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Engine for shadow round trips over one session
pub struct ShadowEngine<T: RequestTransport> {
    transport: Arc<T>,
    topics: TopicBuilder,
    default_timeout: Duration,
}

impl<T: RequestTransport> ShadowEngine<T> {
    pub fn new(transport: Arc<T>, topics: TopicBuilder, default_timeout: Duration) -> Self {
        Self {
            transport,
            topics,
            default_timeout,
        }
    }

    /// GET a named shadow's reported state
    pub async fn send_get(
        &self,
        thing_name: &str,
        shadow_name: &str,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(
            thing_name,
            shadow_name,
            ShadowOperation::Get,
            None,
            self.default_timeout,
        )
        .await
    }

    /// UPDATE a named shadow's desired state
    pub async fn send_update(
        &self,
        thing_name: &str,
        shadow_name: &str,
        desired: Value,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(
            thing_name,
            shadow_name,
            ShadowOperation::Update,
            Some(desired),
            self.default_timeout,
        )
        .await
    }

    /// Run one shadow round trip bounded by `timeout`.
    ///
    /// The returned envelope is uniform: broker acceptance arrives as code
    /// 200 with the reported state, broker rejection as the broker's own
    /// code/message, and a local timeout as a synthesized code-500 envelope.
    /// The pending entry never outlives this call.
    pub async fn send(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
        desired: Option<Value>,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ApiError> {
        // fail before registering anything when the broker is unreachable
        self.transport.ensure_ready().await?;
        self.transport
            .ensure_reply_pair(thing_name, shadow_name, operation)
            .await?;

        let token = Uuid::new_v4().to_string();
        let topic = self
            .topics
            .request_topic(thing_name, shadow_name, operation)
            .map_err(|e| ApiError::transport(e.to_string()))?;
        let payload = request_payload(&token, operation, desired);

        let receiver = self
            .transport
            .pending()
            .register(&token, thing_name, shadow_name, operation)
            .await;
        debug!(%token, %topic, "dispatching shadow {operation} request");

        if let Err(e) = self
            .transport
            .publish(&topic, bytes::Bytes::from(payload.into_bytes()))
            .await
        {
            // a failed publish must not leave a dangling entry
            self.transport.pending().remove(&token).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => {
                // completion slot dropped without a reply; the table was
                // already cleared by whoever dropped it
                Ok(ResponseEnvelope::transport_failure("mqtt disconnected"))
            }
            Err(_) => {
                self.transport.pending().remove(&token).await;
                debug!(%token, "shadow request timed out");
                Ok(ResponseEnvelope::timeout(format!(
                    "{thing_name}/{shadow_name} {operation}"
                )))
            }
        }
    }
}

/// Request body published to the shadow topic, tagged with the correlation
/// token the broker echoes back.
fn request_payload(token: &str, operation: ShadowOperation, desired: Option<Value>) -> String {
    let body = match operation {
        ShadowOperation::Get => json!({ "clientToken": token }),
        ShadowOperation::Update => json!({
            "state": { "desired": desired.unwrap_or(Value::Null) },
            "clientToken": token,
        }),
    };
    body.to_string()
}
