//! Mock implementations for testing
//!
//! Enables exercising the correlation core without a live broker or
//! backend.

pub mod mocks;
