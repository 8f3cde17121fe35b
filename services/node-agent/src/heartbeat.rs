//! Heartbeat loop publishing node information to the orchestrator.
//!
//! Every interval the node re-measures its resources and publishes the
//! snapshot on `<namespace>/information`. Publish failures are handled by the
//! gateway and never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broker::Publisher;
use crate::resources::SystemResources;

/// Topic suffix of node information heartbeats.
pub const NODE_INFORMATION_TOPIC_SUFFIX: &str = "information";

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat_loop(
    publisher: Arc<dyn Publisher>,
    interval: Duration,
    technology: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        "Starting heartbeat loop"
    );

    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                let capabilities = SystemResources::measure().capabilities(technology.clone());
                match serde_json::to_vec(&capabilities) {
                    Ok(payload) => {
                        debug!(
                            cpu_usage = capabilities.cpu_usage,
                            memory_usage = capabilities.memory_usage,
                            "Publishing node information"
                        );
                        publisher.publish(NODE_INFORMATION_TOPIC_SUFFIX, payload).await;
                    }
                    Err(e) => error!(error = %e, "Unable to serialize node information"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use nodelink_wire::NodeCapabilities;

    use super::*;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic_suffix: &str, payload: Vec<u8>) {
            self.published
                .lock()
                .unwrap()
                .push((topic_suffix.to_string(), payload));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_publishes_until_shutdown() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_heartbeat_loop(
            publisher.clone(),
            Duration::from_secs(10),
            vec!["containerd".to_string()],
            shutdown_rx,
        ));

        // First tick fires immediately, then one more after the interval.
        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(suffix, _)| suffix == "information"));

        let capabilities: NodeCapabilities = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(capabilities.technology, vec!["containerd"]);
    }
}
