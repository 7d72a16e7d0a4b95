//! Session events broadcast to observers

use crate::error::ErrorCode;
use bytes::Bytes;

/// Lifecycle and message notifications from an [`MqttSession`](super::MqttSession)
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The broker acknowledged a connect
    Connected { client_id: String },
    /// The live connection ended, by request or by loss
    Disconnected { client_id: String, reason: String },
    /// A message arrived on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// A failure that has no caller callback
    Error { code: ErrorCode, message: String },
}

impl SessionEvent {
    /// Event name as seen by host applications
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::MessageReceived { .. } => "received-message",
            SessionEvent::Error { .. } => "got-error",
        }
    }
}
