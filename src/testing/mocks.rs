//! Mock implementations for testing
//!
//! Provides an in-memory [`ClientFactory`] and [`BrokerClient`] so session
//! behaviour can be exercised without a broker. Every client created and
//! every operation issued is recorded; connects can be resolved by hand.

use crate::transport::{
    BrokerClient, ClientFactory, ClientRequest, EngineEvent, FailedToken, MqttError, NewClient,
    TokenAction, TokenResult, TokenSequence,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// How a mock client answers `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Succeed immediately
    Succeed,
    /// Fail immediately with a refused connection
    Fail,
    /// Wait until the test calls [`MockBrokerClient::complete_connect`]
    Manual,
}

/// One operation issued against a mock client
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Connect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock engine recording every client it creates
#[derive(Debug)]
pub struct MockClientFactory {
    behavior: ConnectBehavior,
    pub should_fail_creation: bool,
    pub should_fail_subscribe: bool,
    pub should_fail_publish: bool,
    clients: Mutex<Vec<Arc<MockBrokerClient>>>,
    requests: Mutex<Vec<ClientRequest>>,
}

impl MockClientFactory {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            should_fail_creation: false,
            should_fail_subscribe: false,
            should_fail_publish: false,
            clients: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(ConnectBehavior::Succeed)
    }

    pub fn failing() -> Self {
        Self::new(ConnectBehavior::Fail)
    }

    pub fn manual() -> Self {
        Self::new(ConnectBehavior::Manual)
    }

    pub fn with_creation_failure(mut self) -> Self {
        self.should_fail_creation = true;
        self
    }

    pub fn with_subscribe_failure(mut self) -> Self {
        self.should_fail_subscribe = true;
        self
    }

    pub fn with_publish_failure(mut self) -> Self {
        self.should_fail_publish = true;
        self
    }

    /// All clients created so far, oldest first
    pub fn clients(&self) -> Vec<Arc<MockBrokerClient>> {
        lock(&self.clients).clone()
    }

    pub fn client(&self, index: usize) -> Option<Arc<MockBrokerClient>> {
        lock(&self.clients).get(index).cloned()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Requests passed to `new_client`, oldest first
    pub fn requests(&self) -> Vec<ClientRequest> {
        lock(&self.requests).clone()
    }
}

impl ClientFactory for MockClientFactory {
    fn new_client(&self, request: ClientRequest) -> Result<NewClient, MqttError> {
        lock(&self.requests).push(request.clone());

        if self.should_fail_creation {
            return Err(MqttError::InvalidBrokerUrl(request.endpoint.uri()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Arc::new(MockBrokerClient::new(
            &request.client_id,
            self.behavior,
            self.should_fail_subscribe,
            self.should_fail_publish,
            events_tx,
        ));
        lock(&self.clients).push(Arc::clone(&client));

        Ok(NewClient {
            client,
            events: events_rx,
        })
    }
}

/// Mock client handle
#[derive(Debug)]
pub struct MockBrokerClient {
    client_id: String,
    behavior: ConnectBehavior,
    should_fail_subscribe: bool,
    should_fail_publish: bool,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: watch::Sender<usize>,
    connect_release: Mutex<Option<oneshot::Sender<Result<(), String>>>>,
    connect_gate: Mutex<Option<oneshot::Receiver<Result<(), String>>>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    tokens: TokenSequence,
}

impl MockBrokerClient {
    fn new(
        client_id: &str,
        behavior: ConnectBehavior,
        should_fail_subscribe: bool,
        should_fail_publish: bool,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (release, gate) = oneshot::channel();
        let (call_count, _) = watch::channel(0);
        Self {
            client_id: client_id.to_string(),
            behavior,
            should_fail_subscribe,
            should_fail_publish,
            calls: Mutex::new(Vec::new()),
            call_count,
            connect_release: Mutex::new(Some(release)),
            connect_gate: Mutex::new(Some(gate)),
            events_tx,
            tokens: TokenSequence::default(),
        }
    }

    fn record(&self, call: RecordedCall) {
        let count = {
            let mut calls = lock(&self.calls);
            calls.push(call);
            calls.len()
        };
        self.call_count.send_replace(count);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Wait until at least `count` operations were issued
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.call_count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Resolve a manual connect. Returns false if it was already resolved.
    pub fn complete_connect(&self, result: Result<(), String>) -> bool {
        match lock(&self.connect_release).take() {
            Some(release) => release.send(result).is_ok(),
            None => false,
        }
    }

    /// Inject an engine callback as if it came from the broker
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self) -> TokenResult {
        let token = self.tokens.issue(TokenAction::Connect, &self.client_id);
        self.record(RecordedCall::Connect);

        let outcome = match self.behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::Fail => Err(MqttError::ConnectionRefused(
                "Mock connection failure".to_string(),
            )),
            ConnectBehavior::Manual => {
                let gate = lock(&self.connect_gate).take();
                match gate {
                    Some(gate) => match gate.await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(reason)) => Err(MqttError::ConnectionRefused(reason)),
                        Err(_) => Err(MqttError::ConnectionFailed(
                            "connect abandoned".to_string().into(),
                        )),
                    },
                    None => Err(MqttError::ConnectionFailed(
                        "Event loop already started".to_string().into(),
                    )),
                }
            }
        };

        match outcome {
            Ok(()) => {
                let _ = self.events_tx.send(EngineEvent::ConnectionEstablished);
                Ok(token)
            }
            Err(error) => Err(FailedToken::new(token, error)),
        }
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> TokenResult {
        let token = self.tokens.issue(TokenAction::Subscribe, &self.client_id);
        self.record(RecordedCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });

        if self.should_fail_subscribe {
            return Err(FailedToken::new(
                token,
                MqttError::SubscriptionFailed("Mock subscribe failure".to_string().into()),
            ));
        }
        Ok(token)
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> TokenResult {
        let token = self.tokens.issue(TokenAction::Publish, &self.client_id);
        self.record(RecordedCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });

        if self.should_fail_publish {
            return Err(FailedToken::new(
                token,
                MqttError::PublishFailed("Mock publish failure".to_string().into()),
            ));
        }
        Ok(token)
    }

    async fn disconnect(&self) -> TokenResult {
        let token = self.tokens.issue(TokenAction::Disconnect, &self.client_id);
        self.record(RecordedCall::Disconnect);
        Ok(token)
    }
}
