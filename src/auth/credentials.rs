//! Credential bundle and store
//!
//! The store owns the only mutable reference to the current bundle. Readers
//! get cheap `Arc` snapshots and never block; replacement is atomic. Refresh
//! is single-flight: concurrent callers that find a refresh already running
//! wait for its result instead of racing their own.

use crate::auth::authenticator::{AuthError, Authenticator};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Immutable snapshot of one credential grant
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialBundle {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    /// Only issued on initial login; refresh replies may omit it, in which
    /// case the previous token stays valid.
    pub refresh_token: Option<String>,
}

impl CredentialBundle {
    /// True once the bundle is inside the safety margin of its expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>, safety_margin: chrono::Duration) -> bool {
        now >= self.expires_at - safety_margin
    }
}

/// Holds the current bundle and renews it on demand
pub struct CredentialStore {
    authenticator: Arc<dyn Authenticator>,
    current: RwLock<Option<Arc<CredentialBundle>>>,
    refresh_token: RwLock<Option<String>>,
    // held for the whole authenticator round trip; serializes refreshes
    refresh_guard: Mutex<()>,
    safety_margin: chrono::Duration,
}

impl CredentialStore {
    pub fn new(authenticator: Arc<dyn Authenticator>, safety_margin: chrono::Duration) -> Self {
        Self {
            authenticator,
            current: RwLock::new(None),
            refresh_token: RwLock::new(None),
            refresh_guard: Mutex::new(()),
            safety_margin,
        }
    }

    /// Perform the initial login and install the resulting bundle
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<CredentialBundle>, AuthError> {
        let _guard = self.refresh_guard.lock().await;

        let bundle = self.authenticator.login(username, password).await?;
        debug!(expires_at = %bundle.expires_at, "login succeeded");
        Ok(self.install(bundle).await)
    }

    /// Current bundle, if a login has happened
    pub async fn current(&self) -> Option<Arc<CredentialBundle>> {
        self.current.read().await.clone()
    }

    /// True when no valid-bundle window remains outside the safety margin
    pub async fn needs_refresh(&self) -> bool {
        match self.current.read().await.as_ref() {
            Some(bundle) => bundle.needs_refresh(Utc::now(), self.safety_margin),
            None => true,
        }
    }

    /// Renew the bundle if it is inside the safety margin.
    ///
    /// Returns the freshly installed bundle, or the untouched current one
    /// when no refresh was needed. On failure the stale bundle stays
    /// installed and the error is surfaced to this caller only; the next
    /// credentialed operation retries.
    pub async fn refresh_if_needed(&self) -> Result<Arc<CredentialBundle>, AuthError> {
        // fast path: another task may have refreshed while we waited
        let _guard = self.refresh_guard.lock().await;
        if let Some(bundle) = self.current.read().await.clone() {
            if !bundle.needs_refresh(Utc::now(), self.safety_margin) {
                return Ok(bundle);
            }
        }

        let token = self
            .refresh_token
            .read()
            .await
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;

        match self.authenticator.refresh(&token).await {
            Ok(bundle) => {
                debug!(expires_at = %bundle.expires_at, "credential refresh succeeded");
                Ok(self.install(bundle).await)
            }
            Err(e) => {
                warn!("credential refresh failed: {e}");
                Err(e)
            }
        }
    }

    /// Instant at which the next refresh becomes due, if known
    pub async fn refresh_due_at(&self) -> Option<DateTime<Utc>> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|bundle| bundle.expires_at - self.safety_margin)
    }

    /// Drop all credential state (logout)
    pub async fn clear(&self) {
        let _guard = self.refresh_guard.lock().await;
        *self.current.write().await = None;
        *self.refresh_token.write().await = None;
    }

    async fn install(&self, bundle: CredentialBundle) -> Arc<CredentialBundle> {
        // keep the previous refresh token when the reply omits one
        if let Some(token) = &bundle.refresh_token {
            if !token.is_empty() {
                *self.refresh_token.write().await = Some(token.clone());
            }
        }

        let bundle = Arc::new(bundle);
        *self.current.write().await = Some(bundle.clone());
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAuthenticator {
        refresh_calls: AtomicU32,
        fail_refresh: bool,
    }

    impl CountingAuthenticator {
        fn new(fail_refresh: bool) -> Self {
            Self {
                refresh_calls: AtomicU32::new(0),
                fail_refresh,
            }
        }
    }

    fn bundle(expires_in_secs: i64, refresh_token: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            access_key_id: "AKIA_TEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            refresh_token: refresh_token.map(str::to_string),
        }
    }

    #[async_trait::async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn login(&self, _u: &str, _p: &str) -> Result<CredentialBundle, AuthError> {
            Ok(bundle(60, Some("refresh-1")))
        }

        async fn refresh(&self, _t: &str) -> Result<CredentialBundle, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            // small delay widens the race window for the single-flight test
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.fail_refresh {
                Err(AuthError::RefreshRejected("expired grant".to_string()))
            } else {
                Ok(bundle(3600, None))
            }
        }
    }

    fn store(auth: Arc<CountingAuthenticator>) -> CredentialStore {
        CredentialStore::new(auth, chrono::Duration::seconds(300))
    }

    #[tokio::test]
    async fn test_needs_refresh_without_login() {
        let store = store(Arc::new(CountingAuthenticator::new(false)));
        assert!(store.needs_refresh().await);
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_login_installs_bundle() {
        let store = store(Arc::new(CountingAuthenticator::new(false)));
        let installed = store.login("user", "pass").await.unwrap();
        assert_eq!(installed.access_key_id, "AKIA_TEST");
        assert_eq!(store.current().await.unwrap(), installed);
    }

    #[tokio::test]
    async fn test_refresh_is_single_flight() {
        let auth = Arc::new(CountingAuthenticator::new(false));
        let store = Arc::new(store(auth.clone()));
        // 60s expiry with 300s margin: refresh is immediately due
        store.login("user", "pass").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.refresh_if_needed().await },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // one refresh served every concurrent caller
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_stale_bundle() {
        let auth = Arc::new(CountingAuthenticator::new(true));
        let store = store(auth.clone());
        let stale = store.login("user", "pass").await.unwrap();

        let result = store.refresh_if_needed().await;
        assert!(matches!(result, Err(AuthError::RefreshRejected(_))));
        assert_eq!(store.current().await.unwrap(), stale);

        // lazy retry: the next operation attempts the refresh again
        let _ = store.refresh_if_needed().await;
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_token_survives_omission() {
        let auth = Arc::new(CountingAuthenticator::new(false));
        let store = store(auth.clone());
        store.login("user", "pass").await.unwrap();

        // refresh reply carries no refresh token; the login one must remain
        store.refresh_if_needed().await.unwrap();
        assert_eq!(
            store.refresh_token.read().await.as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn test_fresh_bundle_skips_authenticator() {
        let auth = Arc::new(CountingAuthenticator::new(false));
        let store = store(auth.clone());
        store.login("user", "pass").await.unwrap();
        store.refresh_if_needed().await.unwrap();

        // installed bundle is now valid for an hour; no further calls
        store.refresh_if_needed().await.unwrap();
        store.refresh_if_needed().await.unwrap();
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_state() {
        let store = store(Arc::new(CountingAuthenticator::new(false)));
        store.login("user", "pass").await.unwrap();
        store.clear().await;
        assert!(store.current().await.is_none());
        assert!(matches!(
            store.refresh_if_needed().await,
            Err(AuthError::MissingRefreshToken)
        ));
    }

    #[test]
    fn test_needs_refresh_margin_boundary() {
        let bundle = bundle(100, None);
        let margin = chrono::Duration::seconds(300);
        assert!(bundle.needs_refresh(Utc::now(), margin));
        assert!(!bundle.needs_refresh(Utc::now(), chrono::Duration::seconds(10)));
    }
}
