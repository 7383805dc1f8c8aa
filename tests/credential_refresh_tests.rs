//! Credential lifecycle integration tests: single-flight refresh and
//! failure semantics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use xsense_client::auth::{AuthError, Authenticator, CredentialBundle, CredentialStore};

/// Authenticator whose refresh is slow and counted, so overlapping callers
/// are observable.
struct SlowAuthenticator {
    refresh_calls: AtomicU32,
    refresh_delay: Duration,
    expires_in_secs: i64,
    fail_refresh: bool,
}

impl SlowAuthenticator {
    fn new(expires_in_secs: i64) -> Self {
        Self {
            refresh_calls: AtomicU32::new(0),
            refresh_delay: Duration::from_millis(30),
            expires_in_secs,
            fail_refresh: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    fn bundle(&self, expires_in_secs: i64, refresh_token: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            access_key_id: "AKIA_TEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in_secs),
            refresh_token: refresh_token.map(str::to_string),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for SlowAuthenticator {
    async fn login(&self, _u: &str, _p: &str) -> Result<CredentialBundle, AuthError> {
        Ok(self.bundle(self.expires_in_secs, Some("refresh-token")))
    }

    async fn refresh(&self, _t: &str) -> Result<CredentialBundle, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        if self.fail_refresh {
            Err(AuthError::RefreshRejected("grant expired".to_string()))
        } else {
            Ok(self.bundle(3600, None))
        }
    }
}

fn margin() -> chrono::Duration {
    chrono::Duration::seconds(300)
}

#[tokio::test]
async fn concurrent_refreshes_share_one_authenticator_call() {
    // bundle expires in 60s against a 300s margin: refresh immediately due
    let auth = Arc::new(SlowAuthenticator::new(60));
    let store = Arc::new(CredentialStore::new(auth.clone(), margin()));
    store.login("user", "pass").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.refresh_if_needed().await }));
    }

    let mut bundles = Vec::new();
    for handle in handles {
        bundles.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    // all callers observe the same installed bundle
    for bundle in &bundles {
        assert!(Arc::ptr_eq(bundle, &bundles[0]));
    }
}

#[tokio::test]
async fn failed_refresh_keeps_stale_bundle_and_retries_lazily() {
    let auth = Arc::new(SlowAuthenticator::new(60).failing());
    let store = CredentialStore::new(auth.clone(), margin());
    let stale = store.login("user", "pass").await.unwrap();

    for _ in 0..3 {
        let result = store.refresh_if_needed().await;
        assert!(matches!(result, Err(AuthError::RefreshRejected(_))));
        // the stale bundle stays installed for readers
        assert!(Arc::ptr_eq(&store.current().await.unwrap(), &stale));
    }

    // no background retry loop: one attempt per triggering operation
    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn fresh_bundle_short_circuits_refresh() {
    let auth = Arc::new(SlowAuthenticator::new(3600));
    let store = CredentialStore::new(auth.clone(), margin());
    store.login("user", "pass").await.unwrap();

    for _ in 0..5 {
        tokio_test::assert_ok!(store.refresh_if_needed().await);
    }

    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_due_instant_reflects_margin() {
    let auth = Arc::new(SlowAuthenticator::new(3600));
    let store = CredentialStore::new(auth, margin());
    let bundle = store.login("user", "pass").await.unwrap();

    let due = store.refresh_due_at().await.unwrap();
    assert_eq!(due, bundle.expires_at - margin());
}
