//! Pub/sub transport seam.
//!
//! The gateway never talks to a broker library directly. A `Connector` starts
//! a connection and hands back a `Transport` for outbound requests plus a
//! channel of `TransportEvent`s raised by the connection's own task.
//!
//! Reconnection is the transport's business: after a `ConnectionLost` the
//! transport may raise `Connected` again, and the gateway will resubscribe.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the event channel between a transport and the gateway.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Delivery-guarantee level for publish and subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// MQTT numeric level.
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Errors raised by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be handed to the connection.
    #[error("transport request failed: {0}")]
    Request(String),

    /// The connection is closed.
    #[error("transport disconnected")]
    Disconnected,
}

/// Events raised by a running connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection.
    Connected,

    /// The broker granted every filter of a subscribe request.
    Subscribed,

    /// The broker refused at least one filter of a subscribe request.
    SubscribeRejected { reason: String },

    /// An inbound message.
    Message { topic: String, payload: Vec<u8> },

    /// The connection dropped.
    ConnectionLost { reason: String },
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
}

/// Outbound half of a connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request a subscription to several topics at once.
    ///
    /// Returns once the request is queued; the acknowledgment arrives as
    /// `TransportEvent::Subscribed`.
    async fn subscribe_many(&self, topics: Vec<(String, QoS)>) -> Result<(), TransportError>;

    /// Publish a message, returning once the transport has accepted it.
    ///
    /// Acceptance is not delivery: the MQTT transport returns as soon as the
    /// request is queued on its client, before the broker's PUBACK, and a
    /// publish lost to a dropped connection is not reported here.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// A started connection.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Starts connections. Must not block; connecting happens in the background.
pub trait Connector: Send + Sync {
    fn connect(&self, options: ConnectOptions) -> Connection;
}

/// MQTT-style topic filter matching with `+` and `#` wildcards.
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
