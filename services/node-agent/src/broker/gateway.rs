//! Broker gateway: the node's single pub/sub connection.
//!
//! The gateway:
//! - Fixes the node's topic namespace and routing table on first init
//! - Subscribes to the control topics whenever the transport connects
//! - Dispatches inbound messages to the registered handlers
//! - Publishes outbound messages under the node's namespace

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use nodelink_wire::NodeId;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::topic::{
    MessageHandler, NodeNamespace, TopicRegistry, DELETE_TOPIC_SUFFIX, DEPLOY_TOPIC_SUFFIX,
};
use super::transport::{ConnectOptions, Connector, QoS, Transport, TransportEvent};
use super::Publisher;
use crate::handshake::BrokerEndpoint;
use crate::identity::NodeIdentity;

/// Upper bound on waiting for a publish to be accepted.
pub const PUBLISH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// QoS used for every control subscription and outbound publish.
const CONTROL_QOS: QoS = QoS::AtLeastOnce;

/// The two handlers every node registers.
#[derive(Clone)]
pub struct ControlHandlers {
    pub deploy: Arc<dyn MessageHandler>,
    pub delete: Arc<dyn MessageHandler>,
}

/// State fixed by the first `init` call.
struct Session {
    node_id: NodeId,
    namespace: NodeNamespace,
    topics: Vec<String>,
    transport: Arc<dyn Transport>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Pub/sub gateway owned by the process and shared by reference.
pub struct BrokerGateway {
    connector: Arc<dyn Connector>,
    session: OnceLock<Session>,
    ready: Arc<watch::Sender<bool>>,
    shutdown: watch::Sender<bool>,
    publish_timeout: Duration,
}

impl BrokerGateway {
    /// Create an uninitialized gateway.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (ready, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            connector,
            session: OnceLock::new(),
            ready: Arc::new(ready),
            shutdown,
            publish_timeout: PUBLISH_ACK_TIMEOUT,
        }
    }

    /// Override the publish acknowledgment window.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Bind the gateway to a node and start connecting.
    ///
    /// Only the first call has any effect; later calls are logged and keep
    /// the original identity and routing table. Returns without waiting for
    /// the connection. Must be called from within a tokio runtime.
    pub fn init(&self, identity: &NodeIdentity, broker: &BrokerEndpoint, handlers: ControlHandlers) {
        let mut initialized_now = false;
        let session = self.session.get_or_init(|| {
            initialized_now = true;
            self.start_session(identity, broker, handlers)
        });

        if !initialized_now {
            info!(
                node_id = %session.node_id,
                requested_node_id = %identity.node_id(),
                "Broker gateway already initialized, ignoring init"
            );
        }
    }

    fn start_session(
        &self,
        identity: &NodeIdentity,
        broker: &BrokerEndpoint,
        handlers: ControlHandlers,
    ) -> Session {
        let node_id = identity.node_id().clone();
        let namespace = NodeNamespace::new(&node_id);

        let registry = TopicRegistry::builder()
            .register(namespace.topic(DEPLOY_TOPIC_SUFFIX), handlers.deploy)
            .register(namespace.topic(DELETE_TOPIC_SUFFIX), handlers.delete)
            .build();
        let topics = registry.keys();

        info!(
            node_id = %node_id,
            broker_host = %broker.host,
            broker_port = broker.port,
            topics = ?topics,
            "Initializing broker gateway"
        );

        let connection = self.connector.connect(ConnectOptions {
            client_id: node_id.to_string(),
            host: broker.host.clone(),
            port: broker.port,
        });

        let dispatcher = tokio::spawn(run_dispatch_loop(
            connection.events,
            Arc::clone(&connection.transport),
            Arc::new(registry),
            Arc::clone(&self.ready),
            self.shutdown.subscribe(),
        ));

        Session {
            node_id,
            namespace,
            topics,
            transport: connection.transport,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Node the gateway is bound to, if initialized.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.session.get().map(|s| &s.node_id)
    }

    /// Namespace the gateway publishes under, if initialized.
    pub fn namespace(&self) -> Option<&NodeNamespace> {
        self.session.get().map(|s| &s.namespace)
    }

    /// Routing-table keys, empty before init.
    pub fn topics(&self) -> Vec<String> {
        self.session
            .get()
            .map(|s| s.topics.clone())
            .unwrap_or_default()
    }

    /// Whether the control subscriptions are currently acknowledged.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the control subscriptions are acknowledged.
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in `self`, so this only errors if it is dropped.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Publish `payload` on `<namespace>/<topic_suffix>`.
    ///
    /// Failures and timeouts are logged, never returned.
    pub async fn publish(&self, topic_suffix: &str, payload: Vec<u8>) {
        let Some(session) = self.session.get() else {
            warn!(
                topic_suffix = %topic_suffix,
                "Publish requested before broker gateway initialization, dropping"
            );
            return;
        };

        let topic = session.namespace.topic(topic_suffix);
        debug!(
            topic = %topic,
            payload = %String::from_utf8_lossy(&payload),
            "Publishing to broker"
        );

        let publish = session.transport.publish(&topic, CONTROL_QOS, false, payload);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(topic = %topic, error = %e, "Publish failed"),
            Err(_) => error!(
                topic = %topic,
                timeout_secs = self.publish_timeout.as_secs_f64(),
                "Publish not acknowledged in time"
            ),
        }
    }

    /// Stop dispatching, drain in-flight handlers, then disconnect.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let Some(session) = self.session.get() else {
            return;
        };

        if let Some(dispatcher) = session.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "Dispatch task panicked");
            }
        }

        match session.transport.disconnect().await {
            Ok(()) => info!(transport = session.transport.name(), "Disconnected from broker"),
            Err(e) => warn!(error = %e, "Broker disconnect failed"),
        }
        self.ready.send_replace(false);
    }
}

#[async_trait]
impl Publisher for BrokerGateway {
    async fn publish(&self, topic_suffix: &str, payload: Vec<u8>) {
        BrokerGateway::publish(self, topic_suffix, payload).await;
    }
}

async fn run_dispatch_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    transport: Arc<dyn Transport>,
    registry: Arc<TopicRegistry>,
    ready: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();
    let mut stopping = *shutdown.borrow();

    while !stopping {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Connected) => {
                    info!(transport = transport.name(), "Connected to the broker");
                    let topics = registry.qos_map(CONTROL_QOS);
                    if let Err(e) = transport.subscribe_many(topics).await {
                        error!(error = %e, "Subscribe request failed");
                    }
                }
                Some(TransportEvent::Subscribed) => {
                    info!(topics = ?registry.keys(), "Subscribed to control topics");
                    ready.send_replace(true);
                }
                Some(TransportEvent::SubscribeRejected { reason }) => {
                    error!(
                        topics = ?registry.keys(),
                        reason = %reason,
                        "Control subscriptions refused"
                    );
                    ready.send_replace(false);
                }
                Some(TransportEvent::Message { topic, payload }) => {
                    let registry = Arc::clone(&registry);
                    in_flight.spawn(async move {
                        registry.dispatch(&topic, &payload).await;
                    });
                }
                Some(TransportEvent::ConnectionLost { reason }) => {
                    warn!(reason = %reason, "Connection to broker lost");
                    ready.send_replace(false);
                }
                None => {
                    info!("Transport event stream closed");
                    ready.send_replace(false);
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Message handler panicked");
                }
            }
            changed = shutdown.changed() => {
                stopping = changed.is_err() || *shutdown.borrow();
                if stopping {
                    debug!("Dispatch loop received shutdown");
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Draining in-flight message handlers");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Message handler panicked");
        }
    }
}
