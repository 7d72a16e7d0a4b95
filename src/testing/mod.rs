//! Testing utilities and mock implementations
//!
//! This module provides an in-memory MQTT engine for testing sessions
//! without a broker.

pub mod mocks;

pub use mocks::*;
