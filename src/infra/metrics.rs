//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// HTTP requests handled (monotonic)
    requests_total: AtomicU64,
    /// HTTP requests answered with an error status (monotonic)
    request_errors_total: AtomicU64,
    /// Requests since last report (reset on report)
    requests_since_report: AtomicU64,
    /// Sum of request latencies since last report
    latency_sum_us: AtomicU64,
    /// Max request latency since last report
    latency_max_us: AtomicU64,
    /// Request latency histogram (cumulative, never reset)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Sum of all request latencies (cumulative, for histogram _sum)
    latency_total_us: AtomicU64,
    sessions_started_total: AtomicU64,
    sessions_ended_total: AtomicU64,
    sessions_abandoned_total: AtomicU64,
    claims_total: AtomicU64,
    claim_conflicts_total: AtomicU64,
    claims_released_total: AtomicU64,
    claims_expired_total: AtomicU64,
    visits_completed_total: AtomicU64,
    /// Hub events published
    hub_events_total: AtomicU64,
    /// Hub events lost by lagging subscribers
    hub_events_lagged: AtomicU64,
    /// Hub events that failed to reach the MQTT broker
    mqtt_publish_failed: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

macro_rules! counter {
    ($record:ident, $get:ident, $field:ident) => {
        #[inline]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            request_errors_total: AtomicU64::new(0),
            requests_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_total_us: AtomicU64::new(0),
            sessions_started_total: AtomicU64::new(0),
            sessions_ended_total: AtomicU64::new(0),
            sessions_abandoned_total: AtomicU64::new(0),
            claims_total: AtomicU64::new(0),
            claim_conflicts_total: AtomicU64::new(0),
            claims_released_total: AtomicU64::new(0),
            claims_expired_total: AtomicU64::new(0),
            visits_completed_total: AtomicU64::new(0),
            hub_events_total: AtomicU64::new(0),
            hub_events_lagged: AtomicU64::new(0),
            mqtt_publish_failed: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an HTTP request with its handling latency (lock-free)
    #[inline]
    pub fn record_request(&self, latency_us: u64, is_error: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_since_report.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.request_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    counter!(record_session_started, sessions_started_total, sessions_started_total);
    counter!(record_session_ended, sessions_ended_total, sessions_ended_total);
    counter!(record_session_abandoned, sessions_abandoned_total, sessions_abandoned_total);
    counter!(record_claim, claims_total, claims_total);
    counter!(record_claim_conflict, claim_conflicts_total, claim_conflicts_total);
    counter!(record_claim_released, claims_released_total, claims_released_total);
    counter!(record_claim_expired, claims_expired_total, claims_expired_total);
    counter!(record_visit_completed, visits_completed_total, visits_completed_total);
    counter!(record_hub_event, hub_events_total, hub_events_total);
    counter!(record_mqtt_publish_failed, mqtt_publish_failed, mqtt_publish_failed);

    /// Record events skipped by a lagging hub subscriber
    #[inline]
    pub fn record_hub_lagged(&self, skipped: u64) {
        self.hub_events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    #[inline]
    pub fn hub_events_lagged(&self) -> u64 {
        self.hub_events_lagged.load(Ordering::Relaxed)
    }

    /// Generate a summary and reset the periodic counters
    ///
    /// This is the only method that resets counters. Monotonic totals and the
    /// cumulative latency histogram are only loaded.
    pub fn report(&self, open_sessions: usize, active_claims: usize, connected: usize) -> MetricsSummary {
        let requests = self.requests_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let requests_per_sec = if elapsed.as_secs_f64() > 0.0 {
            requests as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if requests > 0 { latency_sum / requests } else { 0 };

        let mut summary = self.snapshot(open_sessions, active_claims, connected);
        summary.requests_per_sec = requests_per_sec;
        summary.avg_latency_us = avg_latency;
        summary.max_latency_us = max_latency;
        summary
    }

    /// Read-only snapshot (used by the /metrics endpoint)
    pub fn snapshot(&self, open_sessions: usize, active_claims: usize, connected: usize) -> MetricsSummary {
        let lat_buckets = load_buckets(&self.latency_buckets);
        MetricsSummary {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            request_errors_total: self.request_errors_total.load(Ordering::Relaxed),
            requests_per_sec: 0.0,
            avg_latency_us: 0,
            max_latency_us: self.latency_max_us.load(Ordering::Relaxed),
            lat_buckets,
            lat_sum_us: self.latency_total_us.load(Ordering::Relaxed),
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            sessions_started_total: self.sessions_started_total(),
            sessions_ended_total: self.sessions_ended_total(),
            sessions_abandoned_total: self.sessions_abandoned_total(),
            claims_total: self.claims_total(),
            claim_conflicts_total: self.claim_conflicts_total(),
            claims_released_total: self.claims_released_total(),
            claims_expired_total: self.claims_expired_total(),
            visits_completed_total: self.visits_completed_total(),
            hub_events_total: self.hub_events_total(),
            hub_events_lagged: self.hub_events_lagged(),
            mqtt_publish_failed: self.mqtt_publish_failed(),
            open_sessions,
            active_claims,
            connected_canvassers: connected,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics summary
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub request_errors_total: u64,
    pub requests_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Request latency histogram buckets (cumulative since start)
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_sum_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub sessions_started_total: u64,
    pub sessions_ended_total: u64,
    pub sessions_abandoned_total: u64,
    pub claims_total: u64,
    pub claim_conflicts_total: u64,
    pub claims_released_total: u64,
    pub claims_expired_total: u64,
    pub visits_completed_total: u64,
    pub hub_events_total: u64,
    pub hub_events_lagged: u64,
    pub mqtt_publish_failed: u64,
    pub open_sessions: usize,
    pub active_claims: usize,
    pub connected_canvassers: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            requests_total = %self.requests_total,
            requests_per_sec = format!("{:.1}", self.requests_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            open_sessions = %self.open_sessions,
            active_claims = %self.active_claims,
            connected = %self.connected_canvassers,
            claims = %self.claims_total,
            conflicts = %self.claim_conflicts_total,
            visits = %self.visits_completed_total,
            hub_lagged = %self.hub_events_lagged,
            "metrics"
        );
    }
}
