//! Pending-request table
//!
//! Maps a correlation token to the caller awaiting its reply. An entry is
//! completed exactly once - by broker delivery, local timeout or batch
//! failure on disconnect - and leaves the table the moment it completes.
//! Late duplicates find no entry and are dropped silently.

use crate::protocol::{ResponseEnvelope, ShadowOperation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// One registered request awaiting its broker reply
struct PendingEntry {
    thing_name: String,
    shadow_name: String,
    operation: ShadowOperation,
    created_at: Instant,
    completion: oneshot::Sender<ResponseEnvelope>,
}

/// Correlation table for in-flight shadow requests.
///
/// Cheap to clone; clones share the same table.
#[derive(Default, Clone)]
pub struct PendingRequestTable {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under its token and hand back the receiver the
    /// caller awaits. Tokens are UUIDv4; at most one live entry per token.
    pub async fn register(
        &self,
        token: &str,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> oneshot::Receiver<ResponseEnvelope> {
        let (completion, receiver) = oneshot::channel();

        let previous = self.entries.lock().await.insert(
            token.to_string(),
            PendingEntry {
                thing_name: thing_name.to_string(),
                shadow_name: shadow_name.to_string(),
                operation,
                created_at: Instant::now(),
                completion,
            },
        );
        debug_assert!(previous.is_none(), "correlation token reused: {token}");

        receiver
    }

    /// Complete the entry for a token, if one is still live.
    ///
    /// Returns false when the token is unknown (already completed, timed
    /// out, or never ours) - that case is a no-op, never an error.
    pub async fn complete(&self, token: &str, envelope: ResponseEnvelope) -> bool {
        let entry = self.entries.lock().await.remove(token);

        match entry {
            Some(entry) => {
                debug!(
                    token,
                    thing = %entry.thing_name,
                    shadow = %entry.shadow_name,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "completing pending {} request",
                    entry.operation
                );
                // receiver may have been dropped by a cancelled caller
                let _ = entry.completion.send(envelope);
                true
            }
            None => {
                debug!(token, "reply for unknown token dropped");
                false
            }
        }
    }

    /// Drop a registration without completing it (timeout path; the caller
    /// synthesizes its own envelope).
    pub async fn remove(&self, token: &str) {
        self.entries.lock().await.remove(token);
    }

    /// Fail every outstanding request with the same envelope and clear the
    /// table. Used when the connection breaks: no in-flight correlation
    /// survives a session replacement.
    pub async fn fail_all(&self, envelope: ResponseEnvelope) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        let failed = entries.len();

        for (token, entry) in entries {
            debug!(
                %token,
                thing = %entry.thing_name,
                "failing pending request: {}",
                envelope.message
            );
            let _ = entry.completion.send(envelope.clone());
        }

        failed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CODE_TRANSPORT;

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = PendingRequestTable::new();
        let receiver = table
            .register("tok-1", "SBS50ABC123", "2nd_mainpage", ShadowOperation::Get)
            .await;
        assert_eq!(table.len().await, 1);

        assert!(
            table
                .complete("tok-1", ResponseEnvelope::success(None))
                .await
        );
        assert!(table.is_empty().await);

        let envelope = receiver.await.unwrap();
        assert!(envelope.is_success());
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_noop() {
        let table = PendingRequestTable::new();
        let receiver = table
            .register("tok-1", "SBS50ABC123", "2nd_mainpage", ShadowOperation::Get)
            .await;

        assert!(
            table
                .complete("tok-1", ResponseEnvelope::success(None))
                .await
        );
        // second delivery for the same token: silent no-op
        assert!(
            !table
                .complete("tok-1", ResponseEnvelope::error(404, "late duplicate"))
                .await
        );

        // the caller observed only the first completion
        let envelope = receiver.await.unwrap();
        assert!(envelope.is_success());
    }

    #[tokio::test]
    async fn test_unknown_token_is_noop() {
        let table = PendingRequestTable::new();
        assert!(
            !table
                .complete("never-registered", ResponseEnvelope::success(None))
                .await
        );
    }

    #[tokio::test]
    async fn test_remove_prevents_completion() {
        let table = PendingRequestTable::new();
        let mut receiver = table
            .register("tok-1", "SBS50ABC123", "2nd_mainpage", ShadowOperation::Get)
            .await;

        table.remove("tok-1").await;
        assert!(table.is_empty().await);
        assert!(
            !table
                .complete("tok-1", ResponseEnvelope::success(None))
                .await
        );
        // sender dropped without completing
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fail_all_completes_everything() {
        let table = PendingRequestTable::new();
        let mut receivers = Vec::new();
        for i in 0..3 {
            receivers.push(
                table
                    .register(
                        &format!("tok-{i}"),
                        "SBS50ABC123",
                        "2nd_mainpage",
                        ShadowOperation::Get,
                    )
                    .await,
            );
        }

        let failed = table
            .fail_all(ResponseEnvelope::transport_failure("mqtt disconnected"))
            .await;
        assert_eq!(failed, 3);
        assert!(table.is_empty().await);

        for receiver in receivers {
            let envelope = receiver.await.unwrap();
            assert_eq!(envelope.code, CODE_TRANSPORT);
        }
    }

    #[tokio::test]
    async fn test_completion_with_dropped_caller() {
        let table = PendingRequestTable::new();
        let receiver = table
            .register("tok-1", "SBS50ABC123", "2nd_mainpage", ShadowOperation::Get)
            .await;
        drop(receiver);

        // completing towards a gone caller must not error
        assert!(
            table
                .complete("tok-1", ResponseEnvelope::success(None))
                .await
        );
    }
}
