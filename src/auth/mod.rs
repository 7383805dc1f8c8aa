//! Credential lifecycle: the authenticator collaborator and the store that
//! keeps the current bundle fresh.

pub mod authenticator;
pub mod credentials;

pub use authenticator::{AuthError, Authenticator};
pub use credentials::{CredentialBundle, CredentialStore};
