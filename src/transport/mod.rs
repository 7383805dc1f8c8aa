//! Transport abstractions
//!
//! Two seams keep the correlation core testable without a live broker:
//! [`TopicLink`] is the raw subscribe/unsubscribe surface the subscription
//! registry drives, and [`RequestTransport`] is everything the shadow engine
//! needs from a session.

pub mod mqtt;

use crate::error::ApiError;
use crate::protocol::ShadowOperation;
use async_trait::async_trait;
use bytes::Bytes;

/// Raw topic operations against the broker.
///
/// `subscribe` must not return until the broker acknowledged the
/// subscription (bounded by the transport's own ack wait).
#[async_trait]
pub trait TopicLink: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), ApiError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), ApiError>;
}

/// Session surface the shadow engine drives
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Connect if not already connected; fail fast when the broker is
    /// unreachable so no pending entry gets registered for a dead link.
    async fn ensure_ready(&self) -> Result<(), ApiError>;

    /// Subscribe the accepted/rejected pair for one shadow, deduplicated
    /// and acknowledged before returning.
    async fn ensure_reply_pair(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<(), ApiError>;

    /// Publish a request body
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ApiError>;

    /// The pending-request table replies are correlated through
    fn pending(&self) -> &mqtt::PendingRequestTable;
}
