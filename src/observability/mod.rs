//! Observability for the mutual-TLS MQTT client
//!
//! Structured logging through `tracing`; see [`logging`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macro for structured logging
pub use logging::mqtt_span;
