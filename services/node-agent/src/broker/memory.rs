//! In-memory broker for tests and local development.
//!
//! Behaves like a tiny MQTT broker: connecting raises `Connected`, a
//! subscribe request raises `Subscribed` (or `SubscribeRejected` when the
//! broker is set to refuse), and published messages are routed to every
//! connected client with a matching subscription. Every publish is also
//! recorded so tests can assert on the outbound traffic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::transport::{
    topic_matches_filter, ConnectOptions, Connection, Connector, QoS, Transport, TransportError,
    TransportEvent, EVENT_CHANNEL_CAPACITY,
};

/// A message recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct Client {
    client_id: String,
    options: ConnectOptions,
    events: mpsc::Sender<TransportEvent>,
    subscriptions: Vec<(String, QoS)>,
    subscribe_requests: usize,
    connected: bool,
}

#[derive(Default)]
struct BrokerState {
    clients: Vec<Client>,
    published: Vec<PublishedMessage>,
    publish_delay: Option<Duration>,
    fail_publishes: bool,
    reject_subscriptions: bool,
    closed_connections: usize,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every publish stall for `delay` before being accepted.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.lock().publish_delay = delay;
    }

    /// Make every publish fail.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// Refuse every subscribe request, as a broker denying the filters would.
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.lock().reject_subscriptions = reject;
    }

    /// Number of connections ever opened.
    pub fn connection_count(&self) -> usize {
        let state = self.lock();
        state.clients.len() + state.closed_connections
    }

    /// Options used by every connection, in connect order.
    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        self.lock().clients.iter().map(|c| c.options.clone()).collect()
    }

    /// Current subscriptions of a client.
    pub fn subscriptions(&self, client_id: &str) -> Vec<(String, QoS)> {
        self.lock()
            .clients
            .iter()
            .filter(|c| c.client_id == client_id)
            .flat_map(|c| c.subscriptions.clone())
            .collect()
    }

    /// Number of subscribe requests a client has issued.
    pub fn subscribe_requests(&self, client_id: &str) -> usize {
        self.lock()
            .clients
            .iter()
            .filter(|c| c.client_id == client_id)
            .map(|c| c.subscribe_requests)
            .sum()
    }

    /// Every message published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages published on exactly `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Deliver a message from outside (the orchestrator) to subscribed clients.
    ///
    /// Returns the number of clients the message was routed to.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let targets = self.route(topic);
        let count = targets.len();
        for events in targets {
            let _ = events
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                })
                .await;
        }
        count
    }

    /// Drop every connection, raising `ConnectionLost` on each client.
    pub async fn drop_connections(&self, reason: &str) {
        let targets = self.for_connected(|client| {
            client.connected = false;
            client.subscriptions.clear();
        });
        for events in targets {
            let _ = events
                .send(TransportEvent::ConnectionLost {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Re-accept every dropped connection, raising `Connected` again.
    pub async fn restore_connections(&self) {
        let targets: Vec<_> = {
            let mut state = self.lock();
            let reopened = state
                .clients
                .iter_mut()
                .filter(|c| !c.connected && !c.events.is_closed())
                .map(|c| {
                    c.connected = true;
                    c.events.clone()
                })
                .collect();
            reopened
        };
        for events in targets {
            let _ = events.send(TransportEvent::Connected).await;
        }
    }

    /// Forget every client, ending their event streams.
    pub fn close_connections(&self) {
        let mut state = self.lock();
        state.closed_connections += state.clients.len();
        state.clients.clear();
    }

    fn for_connected(
        &self,
        mut f: impl FnMut(&mut Client),
    ) -> Vec<mpsc::Sender<TransportEvent>> {
        let mut state = self.lock();
        let senders = state
            .clients
            .iter_mut()
            .filter(|c| c.connected)
            .map(|c| {
                f(c);
                c.events.clone()
            })
            .collect();
        senders
    }

    fn route(&self, topic: &str) -> Vec<mpsc::Sender<TransportEvent>> {
        self.lock()
            .clients
            .iter()
            .filter(|c| {
                c.connected
                    && c
                        .subscriptions
                        .iter()
                        .any(|(filter, _)| topic_matches_filter(filter, topic))
            })
            .map(|c| c.events.clone())
            .collect()
    }
}

impl Connector for InMemoryBroker {
    fn connect(&self, options: ConnectOptions) -> Connection {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // Fresh channel, cannot be full.
        let _ = tx.try_send(TransportEvent::Connected);

        let client_id = options.client_id.clone();
        debug!(client_id = %client_id, "In-memory client connected");
        self.lock().clients.push(Client {
            client_id: client_id.clone(),
            options,
            events: tx,
            subscriptions: Vec::new(),
            subscribe_requests: 0,
            connected: true,
        });

        Connection {
            transport: Arc::new(InMemoryTransport {
                broker: self.clone(),
                client_id,
            }),
            events: rx,
        }
    }
}

/// Client handle into an `InMemoryBroker`.
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    client_id: String,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe_many(&self, topics: Vec<(String, QoS)>) -> Result<(), TransportError> {
        let (events, event) = {
            let mut state = self.broker.lock();
            let reject = state.reject_subscriptions;
            let client = state
                .clients
                .iter_mut()
                .find(|c| c.client_id == self.client_id && c.connected)
                .ok_or(TransportError::Disconnected)?;
            client.subscribe_requests += 1;
            let event = if reject {
                TransportEvent::SubscribeRejected {
                    reason: format!("broker refused {} filters", topics.len()),
                }
            } else {
                for (topic, qos) in topics {
                    match client.subscriptions.iter_mut().find(|(t, _)| *t == topic) {
                        Some(existing) => existing.1 = qos,
                        None => client.subscriptions.push((topic, qos)),
                    }
                }
                TransportEvent::Subscribed
            };
            (client.events.clone(), event)
        };

        events
            .send(event)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let (delay, fail) = {
            let state = self.broker.lock();
            (state.publish_delay, state.fail_publishes)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::Request("broker rejected publish".to_string()));
        }

        self.broker.lock().published.push(PublishedMessage {
            client_id: self.client_id.clone(),
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.clone(),
        });
        self.broker.deliver(topic, payload).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        for client in state
            .clients
            .iter_mut()
            .filter(|c| c.client_id == self.client_id)
        {
            client.connected = false;
            client.subscriptions.clear();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
