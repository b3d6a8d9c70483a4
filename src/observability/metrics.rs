//! Thread-safe metrics collection
//!
//! Provides atomic counters for connection and delivery statistics plus a
//! bounded sample of acknowledgment round-trip times.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept for ack latency percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex for samples
pub struct MetricsCollector {
    // Connection lifecycle
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnects: AtomicU64,
    connection_start_time: AtomicU64,

    // Traffic
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    acks_received: AtomicU64,
    acks_dropped: AtomicU64,
    protocol_errors: AtomicU64,
    keepalive_probes: AtomicU64,

    ack_latencies: Mutex<Vec<u64>>, // in milliseconds
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            acks_dropped: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            keepalive_probes: AtomicU64::new(0),
            ack_latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self, reconnect: bool) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A live connection went away; `dropped_acks` entries were still pending
    pub fn connection_lost(&self, dropped_acks: usize) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.acks_dropped
            .fetch_add(dropped_acks as u64, Ordering::Relaxed);
        self.connection_closed();
    }

    pub fn connection_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_received(&self, round_trip: Duration) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latencies) = self.ack_latencies.lock() {
            latencies.push(round_trip.as_millis() as u64);
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_probe(&self) {
        self.keepalive_probes.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.reconnects,
            &self.connection_start_time,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
            &self.acks_received,
            &self.acks_dropped,
            &self.protocol_errors,
            &self.keepalive_probes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        if let Ok(mut latencies) = self.ack_latencies.lock() {
            latencies.clear();
        }
    }

    /// Average, p50 and p95 ack round trip (pure function over the samples)
    fn calculate_latency_statistics(&self) -> (f64, f64, f64) {
        let Ok(latencies) = self.ack_latencies.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let started = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if started == 0 {
            0
        } else {
            now.saturating_sub(started)
        };
        let (avg, p50, p95) = self.calculate_latency_statistics();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                reconnects: self.reconnects.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            delivery: DeliveryMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                acks_received: self.acks_received.load(Ordering::Relaxed),
                acks_dropped: self.acks_dropped.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
                keepalive_probes: self.keepalive_probes.load(Ordering::Relaxed),
                avg_ack_latency_ms: avg,
                ack_latency_p50_ms: p50,
                ack_latency_p95_ms: p95,
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub delivery: DeliveryMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub reconnects: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct DeliveryMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub acks_received: u64,
    pub acks_dropped: u64,
    pub protocol_errors: u64,
    pub keepalive_probes: u64,
    pub avg_ack_latency_ms: f64,
    pub ack_latency_p50_ms: f64,
    pub ack_latency_p95_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower = sorted_data[index.floor() as usize] as f64;
        let upper = sorted_data[index.ceil() as usize] as f64;
        lower + (upper - lower) * index.fract()
    }
}
