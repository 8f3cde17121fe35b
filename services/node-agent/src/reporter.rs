//! Job status reporting.

use std::sync::Arc;

use nodelink_wire::{ServiceStatus, StatusEnvelope};
use tracing::{debug, error};

use crate::broker::Publisher;

/// Topic suffix of job status reports.
pub const JOB_STATUS_TOPIC_SUFFIX: &str = "job";

/// Publishes `{job_id, status}` envelopes on the node's job topic.
#[derive(Clone)]
pub struct StatusReporter {
    publisher: Arc<dyn Publisher>,
}

impl StatusReporter {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Report a resolved status. Publish failures are not visible here.
    pub async fn report_status(&self, job_id: &str, status: ServiceStatus) {
        let payload = match StatusEnvelope::new(job_id, status).and_then(|e| e.to_json()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(job_id = %job_id, status = %status, error = %e, "Unable to report service status");
                return;
            }
        };

        debug!(job_id = %job_id, status = %status, "Reporting service status");
        self.publisher
            .publish(JOB_STATUS_TOPIC_SUFFIX, payload)
            .await;
    }
}
