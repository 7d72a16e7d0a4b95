//! Connection session state machine
//!
//! `Unconnected → Connecting → Connected → Disconnecting → Unconnected`
//!
//! A session owns at most one live engine client. Every accepted connect
//! bumps a generation counter; completion handlers and engine events carry
//! the generation they belong to and are dropped once the session moved on.
//! Caller callbacks are `FnOnce` and fire exactly once.

use super::events::SessionEvent;
use super::options::ConnectionOptions;
use super::profile::SessionProfile;
use crate::error::{ClientError, ClientResult};
use crate::identity::TlsConfiguration;
use crate::mqtt_span;
use crate::transport::mqtt::RumqttcFactory;
use crate::transport::{
    BrokerClient, ClientFactory, ClientRequest, EngineEvent, FailedToken, MqttError, NewClient,
    Token, TokenResult,
};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of the session event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Outcome delivered to the caller of a connect, exactly once
type Completion = Box<dyn FnOnce(ClientResult<String>) + Send>;

struct SessionSlot {
    state: SessionState,
    generation: u64,
    client: Option<Arc<dyn BrokerClient>>,
    pending: Option<Completion>,
    event_pump: Option<JoinHandle<()>>,
    /// Connection loss seen before the connect task reported back
    lost_while_connecting: Option<String>,
}

impl SessionSlot {
    /// Detach the current client and stop routing its events
    fn release(&mut self) -> Option<Arc<dyn BrokerClient>> {
        self.lost_while_connecting = None;
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }
        self.client.take()
    }
}

struct SessionInner {
    factory: Arc<dyn ClientFactory>,
    profile: SessionProfile,
    slot: Mutex<SessionSlot>,
    events: broadcast::Sender<SessionEvent>,
}

/// A mutual-TLS MQTT session owned by the caller
///
/// Cloning is cheap; all clones drive the same session. Dropping the last
/// clone stops the engine's background tasks and aborts a pending connect.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl MqttSession {
    /// Session backed by the rumqttc engine
    pub fn new(profile: SessionProfile) -> Self {
        Self::with_factory(Arc::new(RumqttcFactory::new()), profile)
    }

    pub fn with_factory(factory: Arc<dyn ClientFactory>, profile: SessionProfile) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                factory,
                profile,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Unconnected,
                    generation: 0,
                    client: None,
                    pending: None,
                    event_pump: None,
                    lost_while_connecting: None,
                }),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_slot().state
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.inner.profile
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connect using a loosely typed options object
    ///
    /// Validation failures are reported through `on_error` before this
    /// returns. Otherwise exactly one of the callbacks fires later.
    pub fn connect<E, S>(&self, options: &Value, on_error: E, on_success: S)
    where
        E: FnOnce(ClientError) + Send + 'static,
        S: FnOnce(String) + Send + 'static,
    {
        match ConnectionOptions::from_value(options) {
            Ok(options) => self.connect_with(options, on_error, on_success),
            Err(e) => {
                debug!(error = %e, "Rejected connection options");
                on_error(e.into());
            }
        }
    }

    /// Connect using already validated options
    pub fn connect_with<E, S>(&self, options: ConnectionOptions, on_error: E, on_success: S)
    where
        E: FnOnce(ClientError) + Send + 'static,
        S: FnOnce(String) + Send + 'static,
    {
        let completion: Completion = Box::new(move |result| match result {
            Ok(message) => on_success(message),
            Err(error) => on_error(error),
        });
        SessionInner::start_connect(&self.inner, options, completion);
    }

    /// Connect and await the outcome
    pub async fn connect_async(&self, options: ConnectionOptions) -> ClientResult<String> {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |result| {
            let _ = tx.send(result);
        });
        SessionInner::start_connect(&self.inner, options, completion);

        rx.await.unwrap_or(Err(ClientError::ConnectAborted))
    }

    /// Fire-and-forget disconnect; a no-op when there is no client
    ///
    /// A connect still in flight is abandoned and its caller receives
    /// [`ClientError::ConnectAborted`].
    pub fn disconnect(&self) {
        let Some((client, generation)) = SessionInner::begin_disconnect(&self.inner) else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let result = client.disconnect().await;
                    SessionInner::finish_disconnect(&weak, generation, client.client_id(), result);
                });
            }
            Err(_) => {
                let client_id = client.client_id().to_string();
                // dropping the client stops its event loop
                drop(client);
                SessionInner::mark_disconnected(&weak, generation, client_id, None);
            }
        }
    }

    /// Disconnect and wait until the engine has finished
    pub async fn shutdown(&self) {
        if let Some((client, generation)) = SessionInner::begin_disconnect(&self.inner) {
            let result = client.disconnect().await;
            let weak = Arc::downgrade(&self.inner);
            SessionInner::finish_disconnect(&weak, generation, client.client_id(), result);
        }
    }

    /// Publish to `topic` with the profile's QoS and retain flag
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> ClientResult<Token> {
        let client = self.inner.connected_client()?;
        let profile = &self.inner.profile;

        client
            .publish(topic, payload.into(), profile.qos, profile.retain)
            .instrument(mqtt_span!(operation = "publish", topic = %topic))
            .await
            .map_err(|failed| {
                let error = ClientError::Publish(failed);
                self.inner.emit_error(&error);
                error
            })
    }

    /// Subscribe to `topic` with the profile's QoS
    pub async fn subscribe(&self, topic: &str) -> ClientResult<Token> {
        let client = self.inner.connected_client()?;

        client
            .subscribe(topic, self.inner.profile.qos)
            .instrument(mqtt_span!(operation = "subscribe", topic = %topic))
            .await
            .map_err(|failed| {
                let error = ClientError::Subscribe(failed);
                self.inner.emit_error(&error);
                error
            })
    }
}

impl fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSession")
            .field("state", &self.state())
            .field("topic", &self.inner.profile.topic)
            .finish()
    }
}

impl SessionInner {
    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: &ClientError) {
        self.emit(SessionEvent::Error {
            code: error.code(),
            message: error.caller_message(),
        });
    }

    fn connected_client(&self) -> ClientResult<Arc<dyn BrokerClient>> {
        let slot = self.lock_slot();
        match (&slot.state, &slot.client) {
            (SessionState::Connected, Some(client)) => Ok(Arc::clone(client)),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn start_connect(this: &Arc<Self>, options: ConnectionOptions, completion: Completion) {
        let span = mqtt_span!(
            operation = "connect",
            client_id = %options.client_id,
            broker = %options.endpoint()
        );
        let _entered = span.enter();

        let tls = match TlsConfiguration::from_pem(&options.ca_cert, &options.cert, &options.key) {
            Ok(tls) => tls,
            Err(e) => {
                warn!(error = %e, "Failed to build TLS identity");
                completion(Err(e.into()));
                return;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                completion(Err(ClientError::Runtime(e.to_string())));
                return;
            }
        };

        let request = ClientRequest {
            endpoint: options.endpoint(),
            client_id: options.client_id.clone(),
            tls,
            clean_session: this.profile.clean_session,
            keep_alive: this.profile.keep_alive,
            connect_timeout: this.profile.connect_timeout,
        };

        let mut slot = this.lock_slot();
        if slot.state == SessionState::Connecting {
            drop(slot);
            info!("Rejected connect while another connect is in progress");
            completion(Err(ClientError::ConnectInProgress));
            return;
        }

        let NewClient { client, events } = match this.factory.new_client(request) {
            Ok(new_client) => new_client,
            Err(e) => {
                drop(slot);
                warn!(error = %e, "Failed to create MQTT client");
                completion(Err(ClientError::ClientCreation(e)));
                return;
            }
        };

        let superseded = slot.release();
        slot.generation += 1;
        let generation = slot.generation;
        slot.state = SessionState::Connecting;
        slot.client = Some(Arc::clone(&client));
        slot.pending = Some(completion);

        let weak = Arc::downgrade(this);
        slot.event_pump = Some(runtime.spawn(Self::pump_events(weak.clone(), generation, events)));
        drop(slot);

        if let Some(old) = superseded {
            info!(old_client = %old.client_id(), "Superseding previous connection");
            runtime.spawn(async move {
                match old.disconnect().await {
                    Ok(token) => debug!(token = %token, "Superseded client disconnected"),
                    Err(failed) => warn!(error = %failed, "Superseded client failed to disconnect"),
                }
            });
        }

        info!(generation = generation, "Connecting to broker");
        runtime.spawn(
            async move {
                let result = client.connect().await;
                Self::finish_connect(&weak, generation, client, result);
            }
            .instrument(span.clone()),
        );
    }

    fn finish_connect(
        weak: &Weak<Self>,
        generation: u64,
        client: Arc<dyn BrokerClient>,
        result: TokenResult,
    ) {
        let Some(this) = weak.upgrade() else {
            return;
        };

        let mut slot = this.lock_slot();
        if slot.generation != generation {
            debug!(
                generation = generation,
                current = slot.generation,
                "Ignoring connect completion from a superseded client"
            );
            return;
        }
        let completion = slot.pending.take();

        // the engine may report the loss before the connect task gets the lock
        let result = match (result, slot.lost_while_connecting.take()) {
            (Ok(token), Some(reason)) => Err(FailedToken::new(
                token,
                MqttError::ConnectionFailed(reason.into()),
            )),
            (result, _) => result,
        };

        match result {
            Ok(token) => {
                slot.state = SessionState::Connected;
                drop(slot);

                info!(token = %token, "Connected to broker");
                this.emit(SessionEvent::Connected {
                    client_id: client.client_id().to_string(),
                });
                if let Some(completion) = completion {
                    completion(Ok(format!("connected, token:{token}")));
                }

                let weak = Arc::downgrade(&this);
                tokio::spawn(Self::run_post_connect(weak, generation, client));
            }
            Err(failed) => {
                slot.state = SessionState::Unconnected;
                slot.release();
                drop(slot);

                warn!(error = %failed, "Connect failed");
                let error = ClientError::BrokerConnect(failed);
                this.emit_error(&error);
                if let Some(completion) = completion {
                    completion(Err(error));
                }
            }
        }
    }

    /// Subscribe then publish per the profile; outcomes are logged only
    async fn run_post_connect(weak: Weak<Self>, generation: u64, client: Arc<dyn BrokerClient>) {
        let Some(profile) = weak.upgrade().map(|this| this.profile.clone()) else {
            return;
        };

        if profile.subscribe_on_connect {
            match client.subscribe(&profile.topic, profile.qos).await {
                Ok(token) => info!(topic = %profile.topic, token = %token, "Subscribed"),
                Err(failed) => {
                    warn!(topic = %profile.topic, error = %failed, "Subscribe failed");
                    Self::report_if_current(&weak, generation, ClientError::Subscribe(failed));
                }
            }
        }

        if profile.publish_on_connect {
            match client
                .publish(&profile.topic, profile.payload.clone(), profile.qos, profile.retain)
                .await
            {
                Ok(token) => info!(topic = %profile.topic, token = %token, "Published"),
                Err(failed) => {
                    warn!(topic = %profile.topic, error = %failed, "Publish failed");
                    Self::report_if_current(&weak, generation, ClientError::Publish(failed));
                }
            }
        }
    }

    fn report_if_current(weak: &Weak<Self>, generation: u64, error: ClientError) {
        if let Some(this) = weak.upgrade() {
            if this.lock_slot().generation == generation {
                this.emit_error(&error);
            }
        }
    }

    async fn pump_events(
        weak: Weak<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(this) = weak.upgrade() else {
                break;
            };
            this.handle_engine_event(generation, event);
        }
    }

    fn handle_engine_event(&self, generation: u64, event: EngineEvent) {
        let mut slot = self.lock_slot();
        if slot.generation != generation {
            debug!(?event, "Dropping event from a superseded client");
            return;
        }

        match event {
            EngineEvent::ConnectionEstablished => {
                debug!("Engine reported connection established");
            }
            EngineEvent::ConnectionLost(reason) => {
                if slot.state == SessionState::Connecting {
                    debug!(reason = %reason, "Connection lost before connect completed");
                    slot.lost_while_connecting = Some(reason);
                    return;
                }
                if slot.state != SessionState::Connected {
                    return;
                }
                let client_id = slot
                    .client
                    .as_ref()
                    .map(|client| client.client_id().to_string())
                    .unwrap_or_default();
                slot.state = SessionState::Unconnected;
                slot.generation += 1;
                let lost = slot.release();
                drop(slot);
                drop(lost);

                warn!(reason = %reason, "Connection lost");
                self.emit(SessionEvent::Disconnected { client_id, reason });
            }
            EngineEvent::DeliveryComplete { packet_id } => {
                debug!(packet_id = packet_id, "Delivery complete");
            }
            EngineEvent::SubscribeComplete { packet_id, granted } => {
                drop(slot);
                if granted {
                    debug!(packet_id = packet_id, "Subscription granted");
                } else {
                    warn!(packet_id = packet_id, "Subscription refused by broker");
                    self.emit(SessionEvent::Error {
                        code: crate::error::ErrorCode::ErrorSubscribe,
                        message: format!("subscription {packet_id} refused by broker"),
                    });
                }
            }
            EngineEvent::MessageArrived { topic, payload } => {
                drop(slot);
                debug!(topic = %topic, bytes = payload.len(), "Message arrived");
                self.emit(SessionEvent::MessageReceived { topic, payload });
            }
        }
    }

    fn begin_disconnect(this: &Arc<Self>) -> Option<(Arc<dyn BrokerClient>, u64)> {
        let mut slot = this.lock_slot();
        let Some(client) = slot.release() else {
            debug!("Disconnect requested without a client");
            return None;
        };

        slot.generation += 1;
        let generation = slot.generation;
        slot.state = SessionState::Disconnecting;
        let aborted = slot.pending.take();
        drop(slot);

        info!(client_id = %client.client_id(), "Disconnecting");
        if let Some(completion) = aborted {
            completion(Err(ClientError::ConnectAborted));
        }

        Some((client, generation))
    }

    fn finish_disconnect(weak: &Weak<Self>, generation: u64, client_id: &str, result: TokenResult) {
        let failure = match result {
            Ok(token) => {
                info!(token = %token, "Disconnected");
                None
            }
            Err(failed) => {
                warn!(error = %failed, "Disconnect failed");
                Some(failed)
            }
        };
        Self::mark_disconnected(weak, generation, client_id.to_string(), failure);
    }

    fn mark_disconnected(
        weak: &Weak<Self>,
        generation: u64,
        client_id: String,
        failure: Option<FailedToken>,
    ) {
        let Some(this) = weak.upgrade() else {
            return;
        };

        let mut slot = this.lock_slot();
        if slot.generation != generation || slot.state != SessionState::Disconnecting {
            return;
        }
        slot.state = SessionState::Unconnected;
        drop(slot);

        if let Some(failed) = failure {
            this.emit_error(&ClientError::Disconnect(failed));
        }
        this.emit(SessionEvent::Disconnected {
            client_id,
            reason: "disconnect requested".to_string(),
        });
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        slot.release();
        if let Some(completion) = slot.pending.take() {
            completion(Err(ClientError::ConnectAborted));
        }
    }
}
