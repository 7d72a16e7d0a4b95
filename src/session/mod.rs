//! Connection session
//!
//! - [`options`] - validation of caller-supplied connection options
//! - [`profile`] - topic, QoS and payload used after connecting
//! - [`client`] - the [`MqttSession`] state machine
//! - [`events`] - notifications broadcast by a session

pub mod client;
pub mod events;
pub mod options;
pub mod profile;

pub use client::{MqttSession, SessionState};
pub use events::SessionEvent;
pub use options::{ConnectionOptions, ExpectedType, OptionsError, ValueKind};
pub use profile::{qos_from_level, SessionProfile};
