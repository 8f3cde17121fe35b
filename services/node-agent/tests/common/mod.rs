//! Shared fixtures for node agent integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nodelink_node_agent::broker::MessageHandler;
use nodelink_node_agent::handshake::{HandshakeClient, HandshakeResult, REGISTER_PATH};
use nodelink_node_agent::{BrokerEndpoint, NodeIdentity};
use nodelink_wire::NodeCapabilities;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn capabilities() -> NodeCapabilities {
    NodeCapabilities {
        host: "worker-1".to_string(),
        cpu_cores: 4,
        cpu_usage: 10.0,
        memory_usage: 50.0,
        memory_free_mb: 1024,
        gpu_present: false,
        technology: vec!["containerd".to_string()],
    }
}

/// Mock orchestrator assigning `node_id` and a broker port.
pub async fn orchestrator(node_id: &str, broker_port: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REGISTER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": node_id,
            "MQTT_BROKER_PORT": broker_port,
        })))
        .mount(&server)
        .await;
    server
}

/// Run a real handshake against a mock orchestrator.
pub async fn register(node_id: &str, broker_port: serde_json::Value) -> HandshakeResult {
    let server = orchestrator(node_id, broker_port).await;
    HandshakeClient::new()
        .unwrap()
        .perform_handshake("127.0.0.1", server.address().port(), capabilities())
        .await
        .unwrap()
}

/// Identity the orchestrator assigns as `node_id`.
pub async fn identity(node_id: &str) -> NodeIdentity {
    register(node_id, serde_json::json!(8883)).await.identity
}

pub fn endpoint() -> BrokerEndpoint {
    BrokerEndpoint {
        host: "10.0.0.2".to_string(),
        port: 8883,
    }
}

/// Poll `condition` until it holds, panicking after `WAIT`.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Records every message routed to it.
#[derive(Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingHandler {
    pub fn received(&self) -> Vec<(String, Vec<u8>)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        self.received
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
    }
}
