//! Message and identifier types.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::WireError;

// =============================================================================
// Node Identity
// =============================================================================

/// Orchestrator-assigned node identifier.
///
/// The id becomes a topic segment (`nodes/<id>/...`), so it must be non-empty
/// and free of MQTT separators and wildcards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parses a node id, rejecting values that would corrupt topic names.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        let reason = if s.is_empty() {
            Some("must not be empty")
        } else if s.contains('/') {
            Some("must not contain '/'")
        } else if s.contains(['+', '#']) {
            Some("must not contain MQTT wildcards")
        } else if s.chars().any(char::is_control) {
            Some("must not contain control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(WireError::InvalidNodeId {
                value: s.to_string(),
                reason,
            }),
            None => Ok(Self(s.to_string())),
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Local capability snapshot sent to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    /// Host name of the machine.
    pub host: String,

    /// Number of CPU cores available to workloads.
    #[serde(rename = "free_cores")]
    pub cpu_cores: u32,

    /// CPU usage in percent.
    #[serde(rename = "cpu")]
    pub cpu_usage: f64,

    /// Memory usage in percent.
    #[serde(rename = "memory")]
    pub memory_usage: f64,

    /// Free memory in MiB.
    #[serde(rename = "memory_free_in_MB")]
    pub memory_free_mb: u64,

    /// Whether a GPU is present.
    pub gpu_present: bool,

    /// Runtime kinds this node can serve.
    #[serde(default)]
    pub technology: Vec<String>,
}

/// Orchestrator reply to a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAnswer {
    /// Identity assigned to this node.
    #[serde(rename = "id")]
    pub node_id: NodeId,

    /// Port of the cluster's MQTT broker.
    #[serde(rename = "MQTT_BROKER_PORT", deserialize_with = "broker_port")]
    pub broker_port: u16,
}

impl HandshakeAnswer {
    /// Decodes a registration reply.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// The orchestrator sends the port as either a number or a numeric string.
fn broker_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    let port = match Port::deserialize(deserializer)? {
        Port::Number(port) => port,
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid broker port {text:?}")))?,
    };

    if port == 0 {
        return Err(de::Error::custom("broker port must not be 0"));
    }
    Ok(port)
}

// =============================================================================
// Services
// =============================================================================

/// Lifecycle status of a service on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// Decoded but not yet acted upon. Never reported.
    #[default]
    Pending,
    /// The runtime accepted the deployment.
    Active,
    /// The deployment did not come up.
    Failed,
    /// The service is gone from this node.
    Undeployed,
}

impl ServiceStatus {
    /// Whether this status may be published to the orchestrator.
    pub fn is_reportable(self) -> bool {
        !matches!(self, ServiceStatus::Pending)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "PENDING",
            ServiceStatus::Active => "ACTIVE",
            ServiceStatus::Failed => "FAILED",
            ServiceStatus::Undeployed => "UNDEPLOYED",
        };
        f.write_str(s)
    }
}

/// A deploy or delete command as decoded from the control topics.
///
/// Everything besides the identifying fields is kept verbatim in
/// `desired_spec` and handed to the runtime untouched. Absent identifying
/// fields decode as empty strings; an empty runtime kind resolves to no
/// adapter downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name, used as the handle for undeployment.
    #[serde(rename = "sname", default)]
    pub name: String,

    /// Orchestrator job this service belongs to.
    #[serde(default)]
    pub job_id: String,

    /// Key used to pick the runtime adapter.
    #[serde(rename = "runtime", default)]
    pub runtime_kind: String,

    /// Remaining payload fields (image, commands, resources, ...).
    #[serde(flatten)]
    pub desired_spec: Map<String, Value>,

    /// Local status; the orchestrator's value is never trusted.
    #[serde(skip)]
    pub status: ServiceStatus,
}

impl ServiceDescriptor {
    /// Decodes a control-topic payload. The result is always `Pending`.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut service: ServiceDescriptor = serde_json::from_slice(payload)?;
        service.desired_spec.remove("status");
        service.status = ServiceStatus::Pending;
        Ok(service)
    }

    /// Looks up a field of the desired spec.
    pub fn spec_field(&self, key: &str) -> Option<&Value> {
        self.desired_spec.get(key)
    }
}
