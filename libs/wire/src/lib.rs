//! # nodelink-wire
//!
//! Wire types exchanged between a node agent and the cluster orchestrator.
//!
//! ## Design Principles
//!
//! - Field names follow the orchestrator's JSON payloads, Rust names follow
//!   the agent's vocabulary (`sname` decodes into `name`, `runtime` into
//!   `runtime_kind`)
//! - Decoding fails only on payloads that do not parse; absent identifying
//!   fields decode as empty strings and unknown fields are kept
//! - A freshly decoded service is always `PENDING`; only resolved statuses
//!   can leave the process
//!
//! ## Messages
//!
//! - Handshake (`NodeCapabilities` out, `HandshakeAnswer` back)
//! - Control commands (`ServiceDescriptor` on `control/deploy` and
//!   `control/delete`)
//! - Job status reports (`StatusEnvelope` on `job`)

mod envelope;
mod error;
mod types;

pub use envelope::StatusEnvelope;
pub use error::WireError;
pub use types::*;
