//! Registration handshake with the cluster orchestrator.
//!
//! Protocol:
//! 1. Node POSTs its capability snapshot to `/api/node/register`
//! 2. Orchestrator replies with the assigned node id and the MQTT broker port
//! 3. The broker is reached on the orchestrator's address at that port
//!
//! A failed handshake is fatal; there is no retry at this layer.

use std::time::Duration;

use nodelink_wire::{HandshakeAnswer, NodeCapabilities};
use thiserror::Error;
use tracing::{debug, info};

use crate::identity::NodeIdentity;

/// Path of the orchestrator's registration endpoint.
pub const REGISTER_PATH: &str = "/api/node/register";

/// Bound on establishing the TCP connection to the orchestrator.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake failures. All of them abort startup.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The orchestrator could not be contacted.
    #[error("cluster orchestrator unreachable at {address}: {source}")]
    UnreachableOrchestrator {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    /// The reply could not be parsed into an id and broker port.
    #[error("malformed handshake response: {0}")]
    MalformedHandshakeResponse(String),

    /// The orchestrator answered with a non-success status.
    #[error("registration rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Where the node's MQTT broker lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub identity: NodeIdentity,
    pub broker: BrokerEndpoint,
}

/// One-shot registration client.
pub struct HandshakeClient {
    client: reqwest::Client,
}

impl HandshakeClient {
    pub fn new() -> Result<Self, HandshakeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(HandshakeError::Client)?;
        Ok(Self { client })
    }

    /// Register with the orchestrator and bind this node's identity.
    pub async fn perform_handshake(
        &self,
        orchestrator_address: &str,
        orchestrator_port: u16,
        capabilities: NodeCapabilities,
    ) -> Result<HandshakeResult, HandshakeError> {
        let address = format!("{}:{}", orchestrator_address, orchestrator_port);
        let url = format!("http://{}{}", address, REGISTER_PATH);

        info!(
            orchestrator = %address,
            cpu_cores = capabilities.cpu_cores,
            cpu_usage = capabilities.cpu_usage,
            memory_usage = capabilities.memory_usage,
            gpu_present = capabilities.gpu_present,
            technology = ?capabilities.technology,
            "Starting handshake with cluster orchestrator"
        );

        let unreachable = |source| HandshakeError::UnreachableOrchestrator {
            address: address.clone(),
            source,
        };

        let response = self
            .client
            .post(&url)
            .json(&capabilities)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        let body = response.bytes().await.map_err(unreachable)?;

        if !status.is_success() {
            return Err(HandshakeError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        debug!(body = %String::from_utf8_lossy(&body), "Received handshake response");

        let answer = HandshakeAnswer::decode(&body)
            .map_err(|e| HandshakeError::MalformedHandshakeResponse(e.to_string()))?;

        info!(
            node_id = %answer.node_id,
            broker_port = answer.broker_port,
            "Handshake complete"
        );

        Ok(HandshakeResult {
            identity: NodeIdentity::new(answer.node_id, capabilities),
            broker: BrokerEndpoint {
                host: orchestrator_address.to_string(),
                port: answer.broker_port,
            },
        })
    }
}
