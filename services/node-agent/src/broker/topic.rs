//! Topic namespace and the topic → handler routing table.
//!
//! ## Matching
//!
//! Inbound topics are matched against registered keys by substring
//! containment, and every key contained in the topic fires its handler once.
//! With overlapping keys (`control/deploy` and `deploy/extra`) a single
//! message on `.../control/deploy/extra` runs both handlers. Exact
//! segment-wise matching would remove that hazard; until the orchestrator's
//! topic layout is pinned down, the containment behavior is kept as is.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nodelink_wire::NodeId;
use tracing::debug;

use super::transport::QoS;

/// Suffix of the deploy command topic.
pub const DEPLOY_TOPIC_SUFFIX: &str = "control/deploy";

/// Suffix of the delete command topic.
pub const DELETE_TOPIC_SUFFIX: &str = "control/delete";

/// Topic namespace owned by one node: `nodes/<node_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeNamespace(String);

impl NodeNamespace {
    pub fn new(node_id: &NodeId) -> Self {
        Self(format!("nodes/{}", node_id))
    }

    /// Full topic for a suffix under this namespace.
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.0, suffix.trim_start_matches('/'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handles messages routed to a topic key.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Frozen routing table.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    entries: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl TopicRegistry {
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::default()
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscription request covering every key at one QoS level.
    pub fn qos_map(&self, qos: QoS) -> Vec<(String, QoS)> {
        self.entries
            .iter()
            .map(|(key, _)| (key.clone(), qos))
            .collect()
    }

    /// Run every handler whose key is contained in `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let mut matched = 0;
        for (key, handler) in &self.entries {
            if topic.contains(key.as_str()) {
                matched += 1;
                handler.handle(topic, payload).await;
            }
        }

        if matched == 0 {
            debug!(
                topic = %topic,
                payload = %String::from_utf8_lossy(payload),
                "Received message on unrouted topic"
            );
        }
        matched
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct TopicRegistryBuilder {
    entries: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl TopicRegistryBuilder {
    /// Register a handler; a repeated key replaces the earlier handler.
    pub fn register(mut self, key: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((key, handler)),
        }
        self
    }

    pub fn build(self) -> TopicRegistry {
        TopicRegistry {
            entries: self.entries,
        }
    }
}
