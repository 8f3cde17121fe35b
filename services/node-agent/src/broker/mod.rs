//! Pub/sub plumbing between the node and the cluster broker.
//!
//! - `gateway`: the node's single connection, routing table, and publish surface
//! - `topic`: namespace helpers and the substring-matching routing table
//! - `transport`: the connector/transport seam
//! - `mqtt`: rumqttc-backed transport
//! - `memory`: in-memory broker for tests and local runs

use async_trait::async_trait;

pub mod gateway;
pub mod memory;
pub mod mqtt;
pub mod topic;
pub mod transport;

pub use gateway::{BrokerGateway, ControlHandlers, PUBLISH_ACK_TIMEOUT};
pub use memory::{InMemoryBroker, PublishedMessage};
pub use mqtt::{MqttConnector, MqttSettings};
pub use topic::{
    MessageHandler, NodeNamespace, TopicRegistry, DELETE_TOPIC_SUFFIX, DEPLOY_TOPIC_SUFFIX,
};
pub use transport::{ConnectOptions, Connection, Connector, QoS, Transport, TransportError, TransportEvent};

/// Fire-and-forget publish surface used by reporters.
///
/// Implementations log failures instead of returning them.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic_suffix: &str, payload: Vec<u8>);
}
