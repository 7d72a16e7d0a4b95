//! Unified error taxonomy for the mutual-TLS MQTT client
//!
//! Component errors ([`OptionsError`], [`IdentityError`], [`MqttError`],
//! [`ConfigError`]) are folded into [`ClientError`], which is what session
//! callbacks receive. Each variant maps onto a stable caller-facing
//! [`ErrorCode`].

use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::session::OptionsError;
use crate::transport::{FailedToken, MqttError};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum length of a sanitized message
const MAX_MESSAGE_LEN: usize = 500;

/// Caller-facing error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RangeError,
    InvalidIdentity,
    ErrorConfig,
    ErrorConnection,
    ErrorSubscribe,
    ErrorPublish,
    ErrorDisconnect,
    NoConnection,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RangeError => "RANGE_ERROR",
            ErrorCode::InvalidIdentity => "INVALID_IDENTITY",
            ErrorCode::ErrorConfig => "ERROR_CONFIG",
            ErrorCode::ErrorConnection => "ERROR_CONNECTION",
            ErrorCode::ErrorSubscribe => "ERROR_SUBSCRIBE",
            ErrorCode::ErrorPublish => "ERROR_PUBLISH",
            ErrorCode::ErrorDisconnect => "ERROR_DISCONNECT",
            ErrorCode::NoConnection => "NO_CONNECTION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("a connect is already in progress")]
    ConnectInProgress,

    #[error("not connected")]
    NotConnected,

    #[error("failed to create client: {0}")]
    ClientCreation(#[source] MqttError),

    #[error("failed to connect, token:{}", .0.token)]
    BrokerConnect(#[source] FailedToken),

    #[error("connect aborted by disconnect")]
    ConnectAborted,

    #[error("failed to subscribe, token:{}", .0.token)]
    Subscribe(#[source] FailedToken),

    #[error("failed to publish, token:{}", .0.token)]
    Publish(#[source] FailedToken),

    #[error("failed to disconnect, token:{}", .0.token)]
    Disconnect(#[source] FailedToken),

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Options(_) => ErrorCode::RangeError,
            ClientError::Identity(_) => ErrorCode::InvalidIdentity,
            ClientError::Config(_) | ClientError::Runtime(_) => ErrorCode::ErrorConfig,
            ClientError::ConnectInProgress
            | ClientError::ClientCreation(_)
            | ClientError::BrokerConnect(_)
            | ClientError::ConnectAborted => ErrorCode::ErrorConnection,
            ClientError::NotConnected => ErrorCode::NoConnection,
            ClientError::Subscribe(_) => ErrorCode::ErrorSubscribe,
            ClientError::Publish(_) => ErrorCode::ErrorPublish,
            ClientError::Disconnect(_) => ErrorCode::ErrorDisconnect,
        }
    }

    /// True when retrying with the same input cannot succeed
    pub fn is_configuration_error(&self) -> bool {
        match self {
            ClientError::Options(_)
            | ClientError::Identity(_)
            | ClientError::Config(_)
            | ClientError::Runtime(_) => true,
            ClientError::ClientCreation(error) => matches!(error, MqttError::InvalidBrokerUrl(_)),
            _ => false,
        }
    }

    /// Message suitable for session events and host applications
    pub fn caller_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                message.push_str(": ");
                message.push_str(&cause_text);
            }
            source = cause.source();
        }
        sanitize_error_message(&message)
    }
}

fn pem_block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)-----BEGIN [A-Z ]+-----.*?-----END [A-Z ]+-----").ok())
        .as_ref()
}

/// Strip PEM material and bound the length of a message
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = match pem_block_pattern() {
        Some(pattern) => pattern.replace_all(message, "<pem redacted>").into_owned(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for session operations
pub type ClientResult<T> = Result<T, ClientError>;
