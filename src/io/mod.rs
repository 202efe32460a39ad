//! IO modules - external system interfaces
//!
//! - `http_api` - JSON HTTP API and the /health and /metrics endpoints
//! - `mqtt_egress` - MQTT publisher for hub events
//! - `activity_log` - Activity mirror to file (JSONL format)
//! - `prometheus` - Prometheus text formatting

pub mod activity_log;
pub mod http_api;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use activity_log::{create_activity_log, ActivityLog, ActivityLogSender};
pub use http_api::{start_http_server, ApiState};
pub use mqtt_egress::MqttPublisher;
