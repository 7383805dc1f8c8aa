//! MQTT transport: connection session, subscription registry and the
//! pending-request correlation table.

pub mod options;
pub mod pending;
pub mod session;
pub mod subscriptions;

pub use options::{configure_mqtt_options, MqttEndpoint, ReconnectConfig};
pub use pending::PendingRequestTable;
pub use session::{ConnectionState, MqttSession};
pub use subscriptions::SubscriptionRegistry;
