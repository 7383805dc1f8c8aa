//! Observability: structured logging setup for embedding applications

pub mod logging;

pub use logging::{init_logging, init_logging_from_env, LogFormat};
