//! Typed client surface: HTTPS API calls, shadow operations and event
//! listener registration.

pub mod client;
pub mod http;
pub mod model;

pub use client::XsenseClient;
pub use http::{biz_codes, HttpBackend, ReqwestBackend, SignedRequest};
pub use model::{DeviceType, House, Room, Sensor, Station};
