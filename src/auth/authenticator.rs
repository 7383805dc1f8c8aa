//! Authenticator collaborator interface
//!
//! The SRP handshake and token exchange live outside this crate; the client
//! consumes them as an opaque capability that yields credential bundles.

use crate::auth::credentials::CredentialBundle;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the authentication collaborator
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("refresh rejected: {0}")]
    RefreshRejected(String),
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("authentication backend unreachable: {0}")]
    Unreachable(String),
}

/// Capability that exchanges user credentials or a refresh token for a
/// time-bounded credential bundle.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Full login with username/password
    async fn login(&self, username: &str, password: &str) -> Result<CredentialBundle, AuthError>;

    /// Renew an earlier login using its refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialBundle, AuthError>;
}
