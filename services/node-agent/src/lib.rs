//! nodelink Node Agent Library
//!
//! The node agent runs on each worker host of the cluster. It registers with
//! the cluster orchestrator, holds one pub/sub connection to the cluster
//! broker, and drives container runtimes in response to deploy and delete
//! commands.
//!
//! ## Architecture
//!
//! ```text
//! handshake ──► identity ──► BrokerGateway ──► TopicRegistry
//!                                 ▲                 │
//!                                 │                 ▼
//!                         StatusReporter ◄── DeploymentCoordinator ──► RuntimeAdapter
//! ```
//!
//! ## Modules
//!
//! - `handshake`: registration with the orchestrator
//! - `broker`: gateway, routing table, and transports
//! - `coordinator`: deploy/delete command handling
//! - `runtime`: runtime adapter interface and registry
//! - `reporter`: job status publishing
//! - `heartbeat`: periodic node information publishing

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod handshake;
pub mod heartbeat;
pub mod identity;
pub mod reporter;
pub mod resources;
pub mod runtime;

pub use broker::{BrokerGateway, ControlHandlers, InMemoryBroker, MqttConnector, Publisher};
pub use coordinator::{CoordinatorError, DeploymentCoordinator};
pub use handshake::{BrokerEndpoint, HandshakeClient, HandshakeError, HandshakeResult};
pub use identity::NodeIdentity;
pub use reporter::StatusReporter;
pub use runtime::{MockRuntime, RuntimeAdapter, RuntimeError, RuntimeRegistry};
