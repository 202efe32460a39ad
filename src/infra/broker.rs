//! Embedded MQTT broker using rumqttd
//!
//! Lets a single-box deployment fan hub events out to MQTT subscribers
//! without running a separate broker.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: 1000,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                // Hub events are small JSON documents
                max_payload_size: 64 * 1024,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread if enabled.
///
/// Returns `Ok(false)` when the broker is disabled in config.
pub fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<bool> {
    if !app_config.broker_enabled() {
        info!("broker_disabled");
        return Ok(false);
    }

    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr =
        addr.parse().with_context(|| format!("Invalid broker bind address {addr}"))?;

    let config = broker_config(listen);
    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(config);
            // start() blocks for the life of the broker
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("Failed to spawn broker thread")?;

    // Give broker time to bind before the publisher connects
    thread::sleep(std::time::Duration::from_millis(100));
    info!(listen = %listen, "broker_started");
    Ok(true)
}
