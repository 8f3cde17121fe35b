//! MQTT transport backed by `rumqttc`.
//!
//! The rumqttc event loop runs on its own task and is translated into
//! `TransportEvent`s. rumqttc reconnects on the next poll after an error; the
//! only policy added here is a fixed pause between failed polls so a dead
//! broker does not spin the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, SubAck, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::transport::{
    ConnectOptions, Connection, Connector, QoS, Transport, TransportError, TransportEvent,
    EVENT_CHANNEL_CAPACITY,
};

/// Pause after a failed poll before rumqttc attempts to reconnect.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Capacity of rumqttc's request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// MQTT session settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Opens MQTT connections.
#[derive(Debug, Clone, Default)]
pub struct MqttConnector {
    settings: MqttSettings,
}

impl MqttConnector {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }
}

impl Connector for MqttConnector {
    fn connect(&self, options: ConnectOptions) -> Connection {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options.set_keep_alive(self.settings.keep_alive);
        mqtt_options.set_clean_session(true);

        info!(
            client_id = %options.client_id,
            broker = %format!("tcp://{}:{}", options.host, options.port),
            "Connecting to MQTT broker"
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_event_loop(event_loop, tx, Arc::clone(&closing)));

        Connection {
            transport: Arc::new(MqttTransport { client, closing }),
            events: rx,
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    closing: Arc<AtomicBool>,
) {
    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(code = ?ack.code, "MQTT connection acknowledged");
                Some(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => Some(suback_event(&ack)),
            Ok(Event::Incoming(Packet::Publish(publish))) => Some(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => Some(TransportEvent::ConnectionLost {
                reason: "broker sent DISCONNECT".to_string(),
            }),
            Ok(_) => None,
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("MQTT event loop closed");
                    break;
                }
                let _ = events
                    .send(TransportEvent::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await;
                tokio::time::sleep(RECONNECT_PAUSE).await;
                None
            }
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("Gateway dropped the event channel, stopping MQTT event loop");
                break;
            }
        }
    }
}

/// A SubAck only counts as a subscription when every filter was granted.
fn suback_event(ack: &SubAck) -> TransportEvent {
    let refused = ack
        .return_codes
        .iter()
        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
        .count();

    if refused == 0 {
        debug!(pkid = ack.pkid, "MQTT subscription acknowledged");
        return TransportEvent::Subscribed;
    }

    error!(
        pkid = ack.pkid,
        refused,
        requested = ack.return_codes.len(),
        "MQTT broker refused subscription filters"
    );
    TransportEvent::SubscribeRejected {
        reason: format!(
            "broker refused {} of {} filters",
            refused,
            ack.return_codes.len()
        ),
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Outbound half of an MQTT connection.
pub struct MqttTransport {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe_many(&self, topics: Vec<(String, QoS)>) -> Result<(), TransportError> {
        let filters = topics
            .into_iter()
            .map(|(topic, qos)| SubscribeFilter::new(topic, to_mqtt_qos(qos)));
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "MQTT disconnect request failed");
            return Err(TransportError::Request(e.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
