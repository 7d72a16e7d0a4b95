//! Impure I/O operations for the rumqttc engine
//!
//! Owns the rumqttc [`AsyncClient`] and drives its [`EventLoop`] on a spawned
//! task. Connection state is published on a watch channel and every routed
//! event is forwarded to the session as an [`EngineEvent`].

use super::connection::{configure_mqtt_options, ConnectionState, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    BrokerClient, ClientFactory, ClientRequest, EngineEvent, FailedToken, NewClient, Token,
    TokenAction, TokenResult, TokenSequence,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long disconnect waits for the event loop to flush DISCONNECT
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Production [`ClientFactory`] backed by rumqttc
#[derive(Debug, Default, Clone)]
pub struct RumqttcFactory;

impl RumqttcFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ClientFactory for RumqttcFactory {
    fn new_client(&self, request: ClientRequest) -> Result<NewClient, MqttError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = RumqttcClient::new(&request, events_tx);

        debug!(
            client_id = %request.client_id,
            broker = %request.endpoint,
            "Created rumqttc client"
        );

        Ok(NewClient {
            client: Arc::new(client),
            events: events_rx,
        })
    }
}

/// One rumqttc client bound to one broker and client id
pub struct RumqttcClient {
    client_id: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    tokens: TokenSequence,
    connect_timeout: Duration,
}

impl RumqttcClient {
    pub fn new(request: &ClientRequest, events_tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        let mqtt_options = configure_mqtt_options(request);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let ((state_tx, state_rx), (shutdown_tx, _)) = Self::setup_connection_channels();

        Self {
            client_id: request.client_id.clone(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_tx,
            state_rx,
            shutdown_tx,
            events_tx,
            tokens: TokenSequence::default(),
            connect_timeout: request.connect_timeout,
        }
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels =
            watch::channel(ConnectionState::Disconnected("Not connected".to_string()));
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string().into(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone().into()));
                    }
                    ConnectionState::Connecting => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Drive the event loop until shutdown, our own DISCONNECT, or a
    /// connection error. There is no automatic reconnect.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        client_id: String,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) {
        info!(client_id = %client_id, "Starting MQTT event loop");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(client_id = %client_id, "Shutdown signal received");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(route, &state_tx, &events_tx, &client_id) {
                                break;
                            }
                        }
                        Err(e) => {
                            Self::handle_event_loop_error(&e, &state_tx, &events_tx, &client_id);
                            break;
                        }
                    }
                }
            }
        }

        info!(client_id = %client_id, "MQTT event loop stopped");
    }

    /// Process a routed event. Returns true to keep polling, false to stop.
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        events_tx: &mpsc::UnboundedSender<EngineEvent>,
        client_id: &str,
    ) -> bool {
        let keep_polling = match &route {
            EventRoute::ConnectionAcknowledged => {
                state_tx.send_replace(ConnectionState::Connected);
                info!(client_id = %client_id, "Broker acknowledged connection");
                true
            }
            EventRoute::Disconnected => {
                state_tx.send_replace(ConnectionState::Disconnected(
                    "Broker disconnected".to_string(),
                ));
                warn!(client_id = %client_id, "Broker closed the connection");
                false
            }
            EventRoute::DisconnectSent => {
                state_tx.send_replace(ConnectionState::Disconnected(
                    "Client disconnected".to_string(),
                ));
                false
            }
            EventRoute::SubscriptionConfirmed { return_codes, .. } => {
                debug!(target: "mqtt_transport", "Subscription confirmed: {:?}", return_codes);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::MessageReceived { .. }
            | EventRoute::PublishAcknowledged { .. }
            | EventRoute::OutgoingEvent => true,
        };

        if let Some(event) = MessageHandler::engine_event(&route) {
            // receiver gone means the session dropped this client
            let _ = events_tx.send(event);
        }

        keep_polling
    }

    fn handle_event_loop_error(
        error: &ConnectionError,
        state_tx: &watch::Sender<ConnectionState>,
        events_tx: &mpsc::UnboundedSender<EngineEvent>,
        client_id: &str,
    ) {
        let reason = error.to_string();
        let previous = state_tx.send_replace(ConnectionState::Disconnected(reason.clone()));

        error!(client_id = %client_id, error = %reason, "MQTT event loop error");

        if previous == ConnectionState::Connected {
            let _ = events_tx.send(EngineEvent::ConnectionLost(reason));
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.connection_state();
        if current_state != ConnectionState::Connected {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    fn issue(&self, action: TokenAction) -> Token {
        self.tokens.issue(action, &self.client_id)
    }

    /// Stop the event loop task, waiting briefly for a graceful exit
    async fn stop_event_loop(&self) {
        let handle = self.event_loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(client_id = %self.client_id, "Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(client_id = %self.client_id, "Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!(client_id = %self.client_id, "Event loop task didn't shut down gracefully, forcing abort");
                    let _ = self.shutdown_tx.send(true);
                    abort.abort();
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl BrokerClient for RumqttcClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self) -> TokenResult {
        let token = self.issue(TokenAction::Connect);

        let event_loop = self.event_loop.lock().await.take().ok_or_else(|| {
            FailedToken::new(
                token.clone(),
                MqttError::ConnectionFailed("Event loop already started".to_string().into()),
            )
        })?;

        self.state_tx.send_replace(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.client_id.clone(),
            self.state_tx.clone(),
            self.shutdown_tx.subscribe(),
            self.events_tx.clone(),
        ));
        *self.event_loop_handle.lock().await = Some(handle);

        info!(client_id = %self.client_id, token = %token, "Waiting for ConnAck");

        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await
        {
            let _ = self.shutdown_tx.send(true);
            if let Some(handle) = self.event_loop_handle.lock().await.take() {
                handle.abort();
            }
            self.state_tx
                .send_replace(ConnectionState::Disconnected(e.to_string()));
            return Err(FailedToken::new(token, e));
        }

        Ok(token)
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> TokenResult {
        let token = self.issue(TokenAction::Subscribe);

        if let Err(e) = self.check_connection_state() {
            return Err(FailedToken::new(token, e));
        }

        if let Err(e) = self.client.subscribe(topic, qos).await {
            return Err(FailedToken::new(
                token,
                MqttError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into()),
            ));
        }

        debug!(client_id = %self.client_id, topic = %topic, qos = ?qos, "Subscribe enqueued");
        Ok(token)
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> TokenResult {
        let token = self.issue(TokenAction::Publish);

        if let Err(e) = self.check_connection_state() {
            return Err(FailedToken::new(token, e));
        }

        if let Err(e) = self.client.publish_bytes(topic, qos, retain, payload).await {
            return Err(FailedToken::new(
                token,
                MqttError::PublishFailed(Box::new(e)),
            ));
        }

        debug!(client_id = %self.client_id, topic = %topic, retain = retain, "Publish enqueued");
        Ok(token)
    }

    async fn disconnect(&self) -> TokenResult {
        let token = self.issue(TokenAction::Disconnect);

        let running = self.event_loop_handle.lock().await.is_some();
        let result = if running {
            self.client.disconnect().await
        } else {
            Ok(())
        };

        self.stop_event_loop().await;
        let _ = self.shutdown_tx.send(true);
        self.state_tx.send_replace(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));

        match result {
            Ok(()) => {
                info!(client_id = %self.client_id, token = %token, "MQTT client disconnected");
                Ok(token)
            }
            Err(e) => Err(FailedToken::new(
                token,
                MqttError::DisconnectFailed(Box::new(e)),
            )),
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        // async disconnect is impossible here; only background cleanup
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TlsConfiguration;
    use crate::transport::BrokerEndpoint;

    const CA_PEM: &str = include_str!("../../../tests/fixtures/ca.pem");
    const CLIENT_PEM: &str = include_str!("../../../tests/fixtures/client.pem");
    const KEY_PEM: &str = include_str!("../../../tests/fixtures/client.key");

    fn test_request(port: u16) -> ClientRequest {
        ClientRequest {
            endpoint: BrokerEndpoint::new("127.0.0.1", port),
            client_id: "dev-1".to_string(),
            tls: TlsConfiguration::from_pem(CA_PEM, CLIENT_PEM, KEY_PEM).unwrap(),
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, _state_rx), _) = RumqttcClient::setup_connection_channels();
        let rx = state_tx.subscribe();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Connected);
            // keep the sender alive until the waiter observed the change
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let result =
            RumqttcClient::wait_for_connection_confirmation(rx, Duration::from_millis(200)).await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((_state_tx, state_rx), _) = RumqttcClient::setup_connection_channels();

        let result =
            RumqttcClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10))
                .await;

        assert!(matches!(result, Err(MqttError::ConnectTimeout(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), _) = RumqttcClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Disconnected("Test disconnect".to_string()));
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let result =
            RumqttcClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(200))
                .await;

        let err = result.unwrap_err();
        assert!(matches!(err, MqttError::ConnectionFailed(_)));
        assert!(format!("{err:?}").contains("Test disconnect"));
    }

    #[test]
    fn test_process_connack_marks_connected_and_forwards() {
        let ((state_tx, state_rx), _) = RumqttcClient::setup_connection_channels();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let keep = RumqttcClient::process_event_route(
            EventRoute::ConnectionAcknowledged,
            &state_tx,
            &events_tx,
            "dev-1",
        );

        assert!(keep);
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
        assert_eq!(
            events_rx.try_recv().unwrap(),
            EngineEvent::ConnectionEstablished
        );
    }

    #[test]
    fn test_process_disconnect_sent_stops_loop_silently() {
        let ((state_tx, state_rx), _) = RumqttcClient::setup_connection_channels();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let keep = RumqttcClient::process_event_route(
            EventRoute::DisconnectSent,
            &state_tx,
            &events_tx,
            "dev-1",
        );

        assert!(!keep);
        assert!(matches!(*state_rx.borrow(), ConnectionState::Disconnected(_)));
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_process_message_forwards_payload() {
        let ((state_tx, _), _) = RumqttcClient::setup_connection_channels();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        RumqttcClient::process_event_route(
            EventRoute::MessageReceived {
                topic: "sample-topic/test".to_string(),
                payload: Bytes::from_static(b"hi"),
            },
            &state_tx,
            &events_tx,
            "dev-1",
        );

        assert_eq!(
            events_rx.try_recv().unwrap(),
            EngineEvent::MessageArrived {
                topic: "sample-topic/test".to_string(),
                payload: Bytes::from_static(b"hi"),
            }
        );
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let factory = RumqttcFactory::new();
        let NewClient { client, .. } = factory.new_client(test_request(8883)).unwrap();

        let result = client
            .publish("sample-topic/test", Bytes::from_static(b"{}"), QoS::AtLeastOnce, false)
            .await;

        let failed = result.unwrap_err();
        assert_eq!(failed.token.action, TokenAction::Publish);
        assert!(matches!(failed.error, MqttError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let NewClient { client, .. } = RumqttcFactory::new()
            .new_client(test_request(8883))
            .unwrap();

        let failed = client
            .subscribe("sample-topic/test", QoS::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(failed.error, MqttError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_with_token() {
        // port 1 on loopback refuses immediately
        let NewClient { client, .. } = RumqttcFactory::new().new_client(test_request(1)).unwrap();

        let failed = client.connect().await.unwrap_err();
        assert_eq!(failed.token.action, TokenAction::Connect);
        assert_eq!(failed.token.client_id, "dev-1");
        assert!(matches!(
            failed.error,
            MqttError::ConnectionFailed(_) | MqttError::ConnectTimeout(_)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_succeeds() {
        let NewClient { client, .. } = RumqttcFactory::new()
            .new_client(test_request(8883))
            .unwrap();

        let token = client.disconnect().await.unwrap();
        assert_eq!(token.action, TokenAction::Disconnect);
    }
}
