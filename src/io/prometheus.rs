//! Prometheus text exposition for walk metrics
//!
//! Served by the HTTP API at /metrics.

use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format a metrics snapshot in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut output = String::with_capacity(4096);
    write_http_metrics(&mut output, site, summary);
    write_session_metrics(&mut output, site, summary);
    write_claim_metrics(&mut output, site, summary);
    write_hub_metrics(&mut output, site, summary);
    output
}

fn write_http_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "walk_http_requests_total",
        "Total HTTP requests handled",
        MetricType::Counter,
        site,
        summary.requests_total,
    );
    write_metric(
        output,
        "walk_http_request_errors_total",
        "HTTP requests answered with an error status",
        MetricType::Counter,
        site,
        summary.request_errors_total,
    );
    write_histogram(
        output,
        "walk_http_request_latency_us",
        "HTTP request handling latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.lat_sum_us,
    );
    write_metric(
        output,
        "walk_http_request_latency_p99_us",
        "99th percentile request latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "walk_sessions_started_total",
        "Walk sessions started",
        MetricType::Counter,
        site,
        summary.sessions_started_total,
    );
    write_metric(
        output,
        "walk_sessions_ended_total",
        "Walk sessions completed",
        MetricType::Counter,
        site,
        summary.sessions_ended_total,
    );
    write_metric(
        output,
        "walk_sessions_abandoned_total",
        "Walk sessions abandoned",
        MetricType::Counter,
        site,
        summary.sessions_abandoned_total,
    );
    write_metric(
        output,
        "walk_open_sessions",
        "Currently open (active or paused) sessions",
        MetricType::Gauge,
        site,
        summary.open_sessions as u64,
    );
}

fn write_claim_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "walk_claims_total", "House claims granted", MetricType::Counter, site, summary.claims_total);
    write_metric(
        output,
        "walk_claim_conflicts_total",
        "Claims refused because the address was held",
        MetricType::Counter,
        site,
        summary.claim_conflicts_total,
    );
    write_metric(
        output,
        "walk_claims_released_total",
        "Claims released explicitly or by session end",
        MetricType::Counter,
        site,
        summary.claims_released_total,
    );
    write_metric(
        output,
        "walk_claims_expired_total",
        "Claims marked expired by the sweep",
        MetricType::Counter,
        site,
        summary.claims_expired_total,
    );
    write_metric(
        output,
        "walk_visits_completed_total",
        "House visits completed",
        MetricType::Counter,
        site,
        summary.visits_completed_total,
    );
    write_metric(
        output,
        "walk_active_claims",
        "Claims currently holding an address",
        MetricType::Gauge,
        site,
        summary.active_claims as u64,
    );
}

fn write_hub_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "walk_hub_events_total",
        "Events published on the hub",
        MetricType::Counter,
        site,
        summary.hub_events_total,
    );
    write_metric(
        output,
        "walk_hub_events_lagged_total",
        "Events skipped by lagging hub subscribers",
        MetricType::Counter,
        site,
        summary.hub_events_lagged,
    );
    write_metric(
        output,
        "walk_mqtt_publish_failed_total",
        "Hub events that could not be handed to MQTT",
        MetricType::Counter,
        site,
        summary.mqtt_publish_failed,
    );
    write_metric(
        output,
        "walk_hub_connections",
        "Connected hub clients",
        MetricType::Gauge,
        site,
        summary.connected_canvassers as u64,
    );
}
