//! Pure connection state and option construction for the rumqttc engine
//!
//! This module contains the pieces of the engine that perform no I/O:
//! the connection state enum, engine errors, broker URL parsing and the
//! translation of a [`ClientRequest`] into rumqttc options.

use crate::transport::{BrokerEndpoint, ClientRequest};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default port for TLS MQTT brokers
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Shortest keep-alive rumqttc accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Connection state of one engine client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Event loop started, waiting for ConnAck
    Connecting,
    /// ConnAck received
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

/// MQTT engine errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("No ConnAck within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Parse `ssl://host:port` (or `mqtts://`) into an endpoint
///
/// The port defaults to 8883 when omitted.
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "ssl" | "mqtts") {
        return Err(MqttError::InvalidBrokerUrl(format!(
            "{broker_url} (scheme must be ssl or mqtts)"
        )));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(DEFAULT_TLS_PORT);

    Ok(BrokerEndpoint::new(host, port))
}

/// Build rumqttc options for a TLS client from a request
pub fn configure_mqtt_options(request: &ClientRequest) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        request.client_id.clone(),
        request.endpoint.host(),
        request.endpoint.port(),
    );

    mqtt_options.set_keep_alive(request.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt_options.set_clean_session(request.clean_session);

    let tls = rumqttc::TlsConfiguration::Rustls(request.tls.client_config());
    mqtt_options.set_transport(RumqttcTransport::tls_with_config(tls));

    mqtt_options
}
