//! Node identity bound by the handshake.

use nodelink_wire::{NodeCapabilities, NodeId};

/// The orchestrator-assigned identity of this node.
///
/// Produced by a successful handshake and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    node_id: NodeId,
    capabilities: NodeCapabilities,
}

impl NodeIdentity {
    /// Bind an assigned id to the capability snapshot it was issued for.
    ///
    /// Crate-private: identities only come out of a successful handshake.
    pub(crate) fn new(node_id: NodeId, capabilities: NodeCapabilities) -> Self {
        Self {
            node_id,
            capabilities,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Capability snapshot sent during registration.
    pub fn capabilities(&self) -> &NodeCapabilities {
        &self.capabilities
    }
}
