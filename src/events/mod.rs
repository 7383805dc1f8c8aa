//! Event fan-out: routing unsolicited broker messages to registered
//! listeners.

pub mod router;

pub use router::{EventListener, EventRouter, SubscriptionKey};
