//! MQTT event sink
//!
//! Publishes each scan event as JSON on the configured topic at QoS 1.
//! The rumqttc event loop runs on its own task and reconnects on error.

use crate::domain::scan::ScanEvent;
use crate::infra::config::Config;
use crate::io::event_sink::{EventSink, SinkError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Publishes held by rumqttc while the broker is unreachable
const REQUEST_QUEUE_SIZE: usize = 64;

pub struct MqttEventSink {
    client: AsyncClient,
    topic: String,
    eventloop_task: JoinHandle<()>,
}

impl MqttEventSink {
    /// Connect to the configured broker. Must be called inside a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("entry-guard-{}-{}", config.camera_id(), std::process::id());
        let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_SIZE);

        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_sink_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = %ack.pkid, "mqtt_sink_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_sink_connection_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            host = %config.mqtt_host(),
            port = %config.mqtt_port(),
            topic = %config.mqtt_topic(),
            "mqtt_sink_initialized"
        );

        Self { client, topic: config.mqtt_topic().to_string(), eventloop_task }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for MqttEventSink {
    fn drop(&mut self) {
        self.eventloop_task.abort();
    }
}

#[async_trait]
impl EventSink for MqttEventSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    /// Queues the event without waiting; a full request queue (broker
    /// unreachable) is a delivery failure for the publisher to retry
    async fn deliver(&self, event: &ScanEvent) -> Result<(), SinkError> {
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, event.to_json().into_bytes())
            .map_err(|e| SinkError::Mqtt(e.to_string()))?;
        debug!(eid = %event.eid, topic = %self.topic, "mqtt_event_queued");
        Ok(())
    }
}
