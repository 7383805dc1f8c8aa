//! X-Sense cloud client
//!
//! An async Rust client for the X-Sense smoke-detector cloud backend,
//! talking over two transports: a request/reply HTTPS API and an
//! AWS-IoT-style MQTT device-shadow service.
//!
//! # Overview
//!
//! The crate's core is the request/response correlation layer built on top
//! of publish/subscribe:
//! - [`shadow::ShadowEngine`] turns a "get shadow" / "update shadow" call
//!   into the subscribe-then-publish-then-await protocol, bounded by a
//!   timeout
//! - [`transport::mqtt::PendingRequestTable`] maps correlation tokens to
//!   waiting callers with exactly-once completion
//! - [`transport::mqtt::SubscriptionRegistry`] deduplicates topic
//!   subscriptions and distinguishes durable from session-scoped ones
//!   across reconnects
//! - [`transport::mqtt::MqttSession`] owns the broker connection and its
//!   state machine
//! - [`events::EventRouter`] fans unsolicited messages (alarms, mutes,
//!   self-test results, forced-logout notices) out to registered listeners
//! - [`auth::CredentialStore`] keeps the time-bounded credential bundle
//!   fresh with a single-flight refresh
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xsense_client::api::XsenseClient;
//! use xsense_client::auth::Authenticator;
//! use xsense_client::config::ClientConfig;
//!
//! # async fn run(authenticator: Arc<dyn Authenticator>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let client = XsenseClient::with_defaults(config, authenticator);
//!
//! client.login("user@example.com", "password").await?;
//! for house in client.get_houses().await? {
//!     for station in client.get_devices(&house.house_id).await? {
//!         println!("{}: online={}", station.station_name, station.online);
//!     }
//! }
//! client.logout().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod protocol;
pub mod shadow;
pub mod testing;
pub mod transport;

pub use api::XsenseClient;
pub use auth::{AuthError, Authenticator, CredentialBundle, CredentialStore};
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use events::{EventListener, EventRouter, SubscriptionKey};
pub use protocol::{DeviceEvent, EventKind, ResponseEnvelope, ShadowOperation};
pub use shadow::ShadowEngine;
pub use transport::mqtt::{ConnectionState, MqttSession};
