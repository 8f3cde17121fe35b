//! Container runtime interface, runtime registry, and mock implementation.
//!
//! The runtime interface abstracts the two actions the control plane can ask
//! for:
//! - Deploying a service described by a `ServiceDescriptor`
//! - Undeploying a service by name
//!
//! Concrete engines are resolved by the runtime kind carried on each
//! descriptor. A mock implementation is provided for testing and development.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodelink_wire::ServiceDescriptor;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while resolving or driving a runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No adapter is registered for the requested runtime kind.
    #[error("unknown runtime kind: {0:?}")]
    UnknownRuntimeKind(String),

    /// The runtime rejected or failed the requested action.
    #[error("runtime action failed: {0}")]
    Action(String),
}

/// Container runtime interface.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Deploy the given service.
    async fn deploy(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError>;

    /// Remove a previously deployed service.
    async fn undeploy(&self, name: &str) -> Result<(), RuntimeError>;
}

type AdapterConstructor = Arc<dyn Fn() -> Arc<dyn RuntimeAdapter> + Send + Sync>;

/// Maps runtime kinds to adapter constructors.
///
/// Built once at startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl RuntimeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a runtime kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn RuntimeAdapter> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    /// Register a single shared adapter instance for a runtime kind.
    pub fn register_shared(
        &mut self,
        kind: impl Into<String>,
        adapter: Arc<dyn RuntimeAdapter>,
    ) -> &mut Self {
        self.register(kind, move || Arc::clone(&adapter))
    }

    /// Resolve the adapter for a runtime kind.
    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn RuntimeAdapter>, RuntimeError> {
        self.constructors
            .get(kind)
            .map(|construct| construct())
            .ok_or_else(|| RuntimeError::UnknownRuntimeKind(kind.to_string()))
    }

    /// Registered runtime kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    deploys: AtomicU64,
    undeploys: AtomicU64,

    /// Whether deployments should "fail".
    fail_deploys: bool,

    /// Whether undeployments should "fail".
    fail_undeploys: bool,

    delay: Duration,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            deploys: AtomicU64::new(0),
            undeploys: AtomicU64::new(0),
            fail_deploys: false,
            fail_undeploys: false,
            delay: Duration::from_millis(100),
        }
    }

    /// Create a mock runtime that fails every action.
    pub fn failing() -> Self {
        Self {
            fail_deploys: true,
            fail_undeploys: true,
            ..Self::new()
        }
    }

    /// Set the simulated latency of each action.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of deploy calls received.
    pub fn deploy_count(&self) -> u64 {
        self.deploys.load(Ordering::SeqCst)
    }

    /// Number of undeploy calls received.
    pub fn undeploy_count(&self) -> u64 {
        self.undeploys.load(Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    async fn deploy(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        info!(
            service = %service.name,
            job_id = %service.job_id,
            runtime = %service.runtime_kind,
            "[MOCK] Deploying service"
        );

        tokio::time::sleep(self.delay).await;

        if self.fail_deploys {
            return Err(RuntimeError::Action(
                "mock runtime configured to fail".to_string(),
            ));
        }

        debug!(service = %service.name, "[MOCK] Service running");
        Ok(())
    }

    async fn undeploy(&self, name: &str) -> Result<(), RuntimeError> {
        self.undeploys.fetch_add(1, Ordering::SeqCst);
        info!(service = %name, "[MOCK] Undeploying service");

        tokio::time::sleep(self.delay / 2).await;

        if self.fail_undeploys {
            return Err(RuntimeError::Action(
                "mock runtime configured to fail".to_string(),
            ));
        }

        debug!(service = %name, "[MOCK] Service removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> ServiceDescriptor {
        ServiceDescriptor::decode(br#"{"sname":"svc1","job_id":"42","runtime":"containerd"}"#)
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_runtime_deploy() {
        let runtime = MockRuntime::new().with_delay(Duration::ZERO);

        runtime.deploy(&test_service()).await.unwrap();
        runtime.undeploy("svc1").await.unwrap();

        assert_eq!(runtime.deploy_count(), 1);
        assert_eq!(runtime.undeploy_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_runtime_failing() {
        let runtime = MockRuntime::failing().with_delay(Duration::ZERO);

        assert!(matches!(
            runtime.deploy(&test_service()).await,
            Err(RuntimeError::Action(_))
        ));
        assert!(runtime.undeploy("svc1").await.is_err());
    }

    #[test]
    fn test_registry_resolves_registered_kind() {
        let mut registry = RuntimeRegistry::new();
        registry.register_shared("containerd", Arc::new(MockRuntime::new()));

        assert!(registry.resolve("containerd").is_ok());
    }

    #[test]
    fn test_registry_unknown_kind() {
        let registry = RuntimeRegistry::new();

        match registry.resolve("unikernel") {
            Err(RuntimeError::UnknownRuntimeKind(kind)) => assert_eq!(kind, "unikernel"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("resolved an unregistered kind"),
        }
    }

    #[test]
    fn test_registry_shared_adapter_is_reused() {
        let mock = Arc::new(MockRuntime::new());
        let mut registry = RuntimeRegistry::new();
        registry.register_shared("containerd", mock.clone());

        let first = registry.resolve("containerd").unwrap();
        let second = registry.resolve("containerd").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_registry_kinds_sorted() {
        let mut registry = RuntimeRegistry::new();
        registry
            .register("unikernel", || Arc::new(MockRuntime::new()))
            .register("containerd", || Arc::new(MockRuntime::new()));

        assert_eq!(registry.kinds(), vec!["containerd", "unikernel"]);
    }
}
