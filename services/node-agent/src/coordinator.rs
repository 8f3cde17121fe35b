//! Deployment coordinator: turns control commands into runtime actions.
//!
//! Deploy: decode → resolve adapter → deploy → ACTIVE or FAILED → report.
//! Delete: decode → resolve adapter → undeploy (outcome ignored) →
//! UNDEPLOYED → report.
//!
//! A payload that does not decode is logged and dropped on both paths; the
//! orchestrator hears nothing about it. Deploy failures are always reported
//! because the orchestrator must learn that a service did not come up, while
//! undeployment is best-effort cleanup.
//!
//! Commands for the same service are not serialized. Two messages for one
//! service name run through the adapter concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use nodelink_wire::{ServiceDescriptor, ServiceStatus, WireError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::broker::{ControlHandlers, MessageHandler};
use crate::reporter::StatusReporter;
use crate::runtime::{RuntimeError, RuntimeRegistry};

/// Per-message coordinator failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The command payload was not a valid service descriptor.
    #[error("unable to decode service descriptor: {0}")]
    Decode(#[from] WireError),
}

/// Drives runtimes in response to deploy/delete commands.
pub struct DeploymentCoordinator {
    runtimes: RuntimeRegistry,
    reporter: StatusReporter,
}

impl DeploymentCoordinator {
    pub fn new(runtimes: RuntimeRegistry, reporter: StatusReporter) -> Self {
        Self { runtimes, reporter }
    }

    /// Handlers to register on the deploy and delete control topics.
    pub fn control_handlers(self: &Arc<Self>) -> ControlHandlers {
        ControlHandlers {
            deploy: Arc::new(DeployHandler(Arc::clone(self))),
            delete: Arc::new(DeleteHandler(Arc::clone(self))),
        }
    }

    /// Handle a deploy command and report the outcome.
    ///
    /// Returns the reported status, or a decode error when nothing was
    /// reported.
    pub async fn handle_deploy(&self, payload: &[u8]) -> Result<ServiceStatus, CoordinatorError> {
        let mut service = ServiceDescriptor::decode(payload)?;

        info!(
            service = %service.name,
            job_id = %service.job_id,
            runtime = %service.runtime_kind,
            "Received deployment request"
        );

        service.status = match self.deploy(&service).await {
            Ok(()) => ServiceStatus::Active,
            Err(e) => {
                warn!(
                    service = %service.name,
                    job_id = %service.job_id,
                    error = %e,
                    "Deployment failed"
                );
                ServiceStatus::Failed
            }
        };

        self.reporter
            .report_status(&service.job_id, service.status)
            .await;
        Ok(service.status)
    }

    /// Handle a delete command and report the service as undeployed.
    pub async fn handle_delete(&self, payload: &[u8]) -> Result<ServiceStatus, CoordinatorError> {
        let mut service = ServiceDescriptor::decode(payload)?;

        info!(
            service = %service.name,
            job_id = %service.job_id,
            runtime = %service.runtime_kind,
            "Received undeployment request"
        );

        if let Err(e) = self.undeploy(&service).await {
            info!(
                service = %service.name,
                error = %e,
                "Undeployment reported an error, ignoring"
            );
        }

        service.status = ServiceStatus::Undeployed;
        self.reporter
            .report_status(&service.job_id, service.status)
            .await;
        Ok(service.status)
    }

    async fn deploy(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError> {
        let runtime = self.runtimes.resolve(&service.runtime_kind)?;
        runtime.deploy(service).await
    }

    async fn undeploy(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError> {
        let runtime = self.runtimes.resolve(&service.runtime_kind)?;
        runtime.undeploy(&service.name).await
    }
}

struct DeployHandler(Arc<DeploymentCoordinator>);

#[async_trait]
impl MessageHandler for DeployHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.0.handle_deploy(payload).await {
            error!(
                topic = %topic,
                payload = %String::from_utf8_lossy(payload),
                error = %e,
                "Dropping deployment request"
            );
        }
    }
}

struct DeleteHandler(Arc<DeploymentCoordinator>);

#[async_trait]
impl MessageHandler for DeleteHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.0.handle_delete(payload).await {
            error!(
                topic = %topic,
                payload = %String::from_utf8_lossy(payload),
                error = %e,
                "Dropping undeployment request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::broker::Publisher;
    use crate::runtime::MockRuntime;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingPublisher {
        fn take(&self) -> Vec<(String, serde_json::Value)> {
            std::mem::take(&mut *self.published.lock().unwrap())
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic_suffix: &str, payload: Vec<u8>) {
            let json = serde_json::from_slice(&payload).unwrap();
            self.published
                .lock()
                .unwrap()
                .push((topic_suffix.to_string(), json));
        }
    }

    const PAYLOAD: &[u8] = br#"{"sname":"svc1","job_id":"42","runtime":"containerd"}"#;

    fn coordinator(
        runtime: Arc<MockRuntime>,
    ) -> (Arc<DeploymentCoordinator>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut runtimes = RuntimeRegistry::new();
        runtimes.register_shared("containerd", runtime);
        let coordinator = Arc::new(DeploymentCoordinator::new(
            runtimes,
            StatusReporter::new(publisher.clone()),
        ));
        (coordinator, publisher)
    }

    #[rstest]
    #[case::runtime_succeeds(MockRuntime::new(), ServiceStatus::Active, "ACTIVE")]
    #[case::runtime_fails(MockRuntime::failing(), ServiceStatus::Failed, "FAILED")]
    #[tokio::test]
    async fn test_deploy_reports_outcome(
        #[case] runtime: MockRuntime,
        #[case] expected: ServiceStatus,
        #[case] wire_status: &str,
    ) {
        let runtime = Arc::new(runtime.with_delay(Duration::ZERO));
        let (coordinator, publisher) = coordinator(runtime.clone());

        let status = coordinator.handle_deploy(PAYLOAD).await.unwrap();

        assert_eq!(status, expected);
        assert_eq!(runtime.deploy_count(), 1);
        assert_eq!(
            publisher.take(),
            vec![(
                "job".to_string(),
                serde_json::json!({"job_id": "42", "status": wire_status})
            )]
        );
    }

    #[rstest]
    #[case::runtime_succeeds(MockRuntime::new())]
    #[case::runtime_fails(MockRuntime::failing())]
    #[tokio::test]
    async fn test_delete_always_reports_undeployed(#[case] runtime: MockRuntime) {
        let runtime = Arc::new(runtime.with_delay(Duration::ZERO));
        let (coordinator, publisher) = coordinator(runtime.clone());

        let status = coordinator.handle_delete(PAYLOAD).await.unwrap();

        assert_eq!(status, ServiceStatus::Undeployed);
        assert_eq!(runtime.undeploy_count(), 1);
        assert_eq!(
            publisher.take(),
            vec![(
                "job".to_string(),
                serde_json::json!({"job_id": "42", "status": "UNDEPLOYED"})
            )]
        );
    }

    #[tokio::test]
    async fn test_unknown_runtime_kind() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::ZERO));
        let (coordinator, publisher) = coordinator(runtime.clone());
        let payload = br#"{"sname":"svc1","job_id":"42","runtime":"unikernel"}"#;

        assert_eq!(
            coordinator.handle_deploy(payload).await.unwrap(),
            ServiceStatus::Failed
        );
        assert_eq!(
            coordinator.handle_delete(payload).await.unwrap(),
            ServiceStatus::Undeployed
        );

        assert_eq!(runtime.deploy_count(), 0);
        assert_eq!(runtime.undeploy_count(), 0);
        let statuses: Vec<_> = publisher
            .take()
            .into_iter()
            .map(|(_, json)| json["status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["FAILED", "UNDEPLOYED"]);
    }

    #[rstest]
    #[case::not_json(b"{not json".as_slice())]
    #[case::wrong_field_type(br#"{"sname":"svc1","job_id":42,"runtime":"containerd"}"#.as_slice())]
    #[case::not_an_object(b"[]".as_slice())]
    #[case::empty(b"".as_slice())]
    #[tokio::test]
    async fn test_malformed_payload_is_dropped(#[case] payload: &[u8]) {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::ZERO));
        let (coordinator, publisher) = coordinator(runtime.clone());

        assert!(matches!(
            coordinator.handle_deploy(payload).await,
            Err(CoordinatorError::Decode(_))
        ));
        assert!(matches!(
            coordinator.handle_delete(payload).await,
            Err(CoordinatorError::Decode(_))
        ));

        assert_eq!(runtime.deploy_count(), 0);
        assert_eq!(runtime.undeploy_count(), 0);
        assert!(publisher.take().is_empty());
    }

    #[tokio::test]
    async fn test_missing_runtime_is_reported() {
        let publisher = Arc::new(RecordingPublisher::default());
        let coordinator = DeploymentCoordinator::new(
            RuntimeRegistry::new(),
            StatusReporter::new(publisher.clone()),
        );
        let payload = br#"{"sname":"svc1","job_id":"42"}"#;

        assert_eq!(
            coordinator.handle_deploy(payload).await.unwrap(),
            ServiceStatus::Failed
        );
        assert_eq!(
            coordinator.handle_delete(payload).await.unwrap(),
            ServiceStatus::Undeployed
        );

        assert_eq!(
            publisher.take(),
            vec![
                (
                    "job".to_string(),
                    serde_json::json!({"job_id": "42", "status": "FAILED"})
                ),
                (
                    "job".to_string(),
                    serde_json::json!({"job_id": "42", "status": "UNDEPLOYED"})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_control_handlers_swallow_decode_errors() {
        let runtime = Arc::new(MockRuntime::new().with_delay(Duration::ZERO));
        let (coordinator, publisher) = coordinator(runtime);
        let handlers = coordinator.control_handlers();

        handlers
            .delete
            .handle("nodes/node-7/control/delete", b"{not json")
            .await;
        handlers
            .deploy
            .handle("nodes/node-7/control/deploy", PAYLOAD)
            .await;

        assert_eq!(publisher.take().len(), 1);
    }
}
