//! Testing utilities and mock implementations
//!
//! This module provides an in-memory broker and a recording handler for
//! exercising the client without a real MQTT broker.

pub mod mocks;

pub use mocks::*;
