//! Job status envelope published on the node's `job` topic.

use serde::{Deserialize, Serialize};

use crate::{ServiceStatus, WireError};

/// Minimal status report for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    /// Job the status refers to.
    pub job_id: String,

    /// Resolved status. Never `PENDING`.
    pub status: ServiceStatus,
}

impl StatusEnvelope {
    /// Builds an envelope, refusing statuses that must stay local.
    pub fn new(job_id: impl Into<String>, status: ServiceStatus) -> Result<Self, WireError> {
        if !status.is_reportable() {
            return Err(WireError::UnreportableStatus(status.to_string()));
        }
        Ok(Self {
            job_id: job_id.into(),
            status,
        })
    }

    /// Serializes the envelope to its JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Serialization(e.to_string()))
    }
}
