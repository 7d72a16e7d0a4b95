//! rumqttc-backed MQTT engine
//!
//! Separates pure functions from I/O operations:
//!
//! - [`connection`] - connection state, errors, broker URL parsing and options
//! - [`message_handler`] - pure routing of event-loop output
//! - [`client`] - the event loop task and the [`BrokerClient`](crate::transport::BrokerClient) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_mtls::identity::TlsConfiguration;
//! use mqtt_mtls::transport::mqtt::{parse_broker_url, RumqttcFactory};
//! use mqtt_mtls::transport::{ClientFactory, ClientRequest};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! # let (ca, cert, key) = ("", "", "");
//! let request = ClientRequest {
//!     endpoint: parse_broker_url("ssl://broker.example:8883")?,
//!     client_id: "dev-1".to_string(),
//!     tls: TlsConfiguration::from_pem(ca, cert, key)?,
//!     clean_session: true,
//!     keep_alive: Duration::from_secs(60),
//!     connect_timeout: Duration::from_secs(30),
//! };
//!
//! let new_client = RumqttcFactory::new().new_client(request)?;
//! let token = new_client.client.connect().await?;
//! println!("connected, token:{token}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttcClient, RumqttcFactory};
pub use connection::{
    configure_mqtt_options, parse_broker_url, ConnectionState, MqttError, DEFAULT_TLS_PORT,
};
pub use message_handler::{EventRoute, MessageHandler};
