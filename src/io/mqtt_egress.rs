//! MQTT publisher for hub events
//!
//! Subscribes to the hub and republishes every event as JSON, one topic per
//! hub channel:
//! - walk/houses - HouseClaimed / HouseReleased / HouseCompleted / HouseExpired
//! - walk/canvassers - CanvasserJoined / CanvasserLeft
//! - walk/locations - CanvasserLocationUpdate
//!
//! All publishes are QoS 0, matching the hub's at-most-once delivery.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::hub::{HubChannel, HubEvent};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Topic names per hub channel
#[derive(Debug, Clone)]
pub struct HubTopics {
    pub houses: String,
    pub canvassers: String,
    pub locations: String,
}

impl HubTopics {
    pub fn from_config(config: &Config) -> Self {
        Self {
            houses: config.mqtt_houses_topic().to_string(),
            canvassers: config.mqtt_canvassers_topic().to_string(),
            locations: config.mqtt_locations_topic().to_string(),
        }
    }

    pub fn topic_for(&self, channel: HubChannel) -> &str {
        match channel {
            HubChannel::HouseStatusUpdate => &self.houses,
            HubChannel::CanvasserUpdate => &self.canvassers,
            HubChannel::CanvasserLocationUpdate => &self.locations,
        }
    }
}

/// MQTT publisher actor
pub struct MqttPublisher {
    client: AsyncClient,
    rx: broadcast::Receiver<HubEvent>,
    topics: HubTopics,
    metrics: Arc<Metrics>,
}

impl MqttPublisher {
    /// Create a publisher connected to the configured broker
    pub fn new(config: &Config, rx: broadcast::Receiver<HubEvent>, metrics: Arc<Metrics>) -> Self {
        let client_id = format!("walk-coordinator-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, topics: HubTopics::from_config(config), metrics }
    }

    /// Forward hub events until shutdown or until the hub is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            houses = %self.topics.houses,
            canvassers = %self.topics.canvassers,
            locations = %self.topics.locations,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        return;
                    }
                }
                result = self.rx.recv() => match result {
                    Ok(event) => self.publish_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        self.metrics.record_hub_lagged(skipped);
                        warn!(skipped = %skipped, "mqtt_egress_lagged");
                    }
                    Err(RecvError::Closed) => {
                        info!("mqtt_egress_hub_closed");
                        return;
                    }
                },
            }
        }
    }

    fn publish_event(&self, event: &HubEvent) {
        let json = match serde_json::to_vec(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(event = %event.name(), error = %e, "mqtt_egress_serialize_failed");
                return;
            }
        };
        let topic = self.topics.topic_for(event.channel());
        // try_publish never waits on the eventloop; a full request queue drops the event
        if let Err(e) = self.client.try_publish(topic, QoS::AtMostOnce, false, json) {
            self.metrics.record_mqtt_publish_failed();
            debug!(event = %event.name(), error = %e, "mqtt_egress_publish_failed");
        }
    }
}
