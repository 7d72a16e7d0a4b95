//! MQTT engine abstraction
//!
//! The session never talks to rumqttc directly. It asks a [`ClientFactory`]
//! for a fresh [`BrokerClient`] bound to one broker and client id, and
//! receives that client's [`EngineEvent`]s on a dedicated channel. This keeps
//! the connection lifecycle testable without a broker.

use crate::identity::TlsConfiguration;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::MqttError;

/// URI scheme for TLS broker connections
pub const BROKER_SCHEME: &str = "ssl";

/// Broker address a client is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    host: String,
    port: u16,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `ssl://{host}:{port}`
    pub fn uri(&self) -> String {
        format!("{BROKER_SCHEME}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Everything an engine needs to build one client handle
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,
    pub tls: TlsConfiguration,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

/// Asynchronous operations tracked by a [`Token`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    Connect,
    Subscribe,
    Publish,
    Disconnect,
}

impl fmt::Display for TokenAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenAction::Connect => "connect",
            TokenAction::Subscribe => "subscribe",
            TokenAction::Publish => "publish",
            TokenAction::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// Identity of one asynchronous engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u64,
    pub action: TokenAction,
    pub client_id: String,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.action, self.id, self.client_id)
    }
}

/// Per-client token counter
#[derive(Debug, Default)]
pub struct TokenSequence {
    next: AtomicU64,
}

impl TokenSequence {
    pub fn issue(&self, action: TokenAction, client_id: &str) -> Token {
        Token {
            id: self.next.fetch_add(1, Ordering::Relaxed) + 1,
            action,
            client_id: client_id.to_string(),
        }
    }
}

/// An operation that completed with a failure, carrying its token
#[derive(Debug, Error)]
#[error("{token} failed: {error}")]
pub struct FailedToken {
    pub token: Token,
    #[source]
    pub error: MqttError,
}

impl FailedToken {
    pub fn new(token: Token, error: MqttError) -> Self {
        Self { token, error }
    }
}

/// Result type of every asynchronous engine operation
pub type TokenResult = Result<Token, FailedToken>;

/// Callbacks from the engine, delivered in order per client
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Broker acknowledged the connection
    ConnectionEstablished,
    /// An established connection dropped
    ConnectionLost(String),
    /// A QoS 1 publish was acknowledged
    DeliveryComplete { packet_id: u16 },
    /// A subscription was acknowledged (or refused)
    SubscribeComplete { packet_id: u16, granted: bool },
    /// A message arrived on a subscribed topic
    MessageArrived { topic: String, payload: Bytes },
}

/// One client handle to one broker
///
/// All operations are asynchronous; the returned token identifies the
/// operation in logs and caller messages.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn client_id(&self) -> &str;

    /// Open the TLS connection and resolve once the broker acknowledged it
    async fn connect(&self) -> TokenResult;

    async fn subscribe(&self, topic: &str, qos: QoS) -> TokenResult;

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> TokenResult;

    async fn disconnect(&self) -> TokenResult;
}

/// A freshly created client and the stream of its engine events
pub struct NewClient {
    pub client: Arc<dyn BrokerClient>,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Creates client handles (the engine's `newClient`)
pub trait ClientFactory: Send + Sync {
    fn new_client(&self, request: ClientRequest) -> Result<NewClient, MqttError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri_uses_ssl_scheme() {
        let endpoint = BrokerEndpoint::new("broker.example", 8883);
        assert_eq!(endpoint.uri(), "ssl://broker.example:8883");
        assert_eq!(endpoint.to_string(), "ssl://broker.example:8883");
    }

    #[test]
    fn test_token_sequence_is_monotonic_per_client() {
        let tokens = TokenSequence::default();
        let first = tokens.issue(TokenAction::Connect, "dev-1");
        let second = tokens.issue(TokenAction::Subscribe, "dev-1");

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.to_string(), "connect#1@dev-1");
        assert_eq!(second.to_string(), "subscribe#2@dev-1");
    }

    #[test]
    fn test_failed_token_display_names_token() {
        let token = TokenSequence::default().issue(TokenAction::Publish, "dev-1");
        let failed = FailedToken::new(token, MqttError::ConnectionRefused("gone".to_string()));
        let message = failed.to_string();
        assert!(message.contains("publish#1@dev-1"));
        assert!(message.contains("gone"));
    }
}
