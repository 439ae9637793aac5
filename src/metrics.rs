//! Run-wide metrics aggregation
//!
//! One [`MetricsAggregator`] is shared by every session of a run. Counters are
//! atomics; the rolling requests-per-second window and the latency histogram
//! sit behind mutexes that are only held for nanosecond-scale operations, so
//! recording never meaningfully blocks a session.

use crate::dispatch::Outcome;
use crate::engine::EngineState;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Width of the rolling requests-per-second window
const RPS_WINDOW: Duration = Duration::from_secs(1);

/// Highest latency the histogram tracks, in microseconds (60s)
const MAX_LATENCY_MICROS: u64 = 60_000_000;

/// Latency distribution of completed requests, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    /// Fastest observed request
    pub min: f64,
    /// Median
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Slowest observed request
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

impl LatencyPercentiles {
    fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        let to_ms = |micros: u64| micros as f64 / 1_000.0;
        Self {
            min: to_ms(histogram.min()),
            p50: to_ms(histogram.value_at_quantile(0.50)),
            p75: to_ms(histogram.value_at_quantile(0.75)),
            p90: to_ms(histogram.value_at_quantile(0.90)),
            p95: to_ms(histogram.value_at_quantile(0.95)),
            p99: to_ms(histogram.value_at_quantile(0.99)),
            max: to_ms(histogram.max()),
            mean: histogram.mean() / 1_000.0,
            stddev: histogram.stdev() / 1_000.0,
        }
    }
}

/// A point-in-time view of the run, safe to serialize for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Engine lifecycle state at snapshot time
    pub state: EngineState,
    /// Whether sessions are currently being run
    pub running: bool,
    /// Requests completed in the last second
    pub rps: f64,
    /// Requests completed since the run started
    pub total_requests: u64,
    /// Requests that failed at the transport level
    pub failed_requests: u64,
    /// Login attempts that did not produce a credential context
    pub auth_failures: u64,
    /// Approximate request bytes put on the wire
    pub bytes_sent: u64,
    /// Response bytes read
    pub bytes_received: u64,
    /// Latency distribution over the whole run
    pub latency: LatencyPercentiles,
}

/// Shared sink for request outcomes, reset at every run start
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    auth_failures: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    window: Mutex<VecDeque<Instant>>,
    latency: Mutex<Histogram<u64>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// A fresh aggregator with all counters at zero
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            window: Mutex::new(VecDeque::new()),
            // 3 significant digits is plenty for load-test percentiles.
            latency: Mutex::new(
                Histogram::new_with_bounds(1, MAX_LATENCY_MICROS, 3)
                    .unwrap_or_else(|_| Histogram::new(3).unwrap()),
            ),
        }
    }

    /// Record one completed dispatch, success or failure
    pub fn record(&self, outcome: &Outcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if outcome.is_failure() {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent
            .fetch_add(outcome.bytes_sent, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(outcome.bytes_received, Ordering::Relaxed);

        let now = Instant::now();
        {
            let mut window = self
                .window
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            window.push_back(now);
            while window
                .front()
                .is_some_and(|t| now.duration_since(*t) > RPS_WINDOW)
            {
                window.pop_front();
            }
        }

        let micros = (outcome.elapsed.as_micros() as u64).clamp(1, MAX_LATENCY_MICROS);
        self.latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .saturating_record(micros);
    }

    /// Record a login attempt that gave up
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests completed in the trailing one-second window
    pub fn current_rps(&self) -> f64 {
        let now = Instant::now();
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) > RPS_WINDOW)
        {
            window.pop_front();
        }
        window.len() as f64
    }

    /// Requests completed since the run started
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Take a serializable snapshot of everything recorded so far
    pub fn snapshot(&self, state: EngineState) -> MetricsSnapshot {
        let latency = {
            let histogram = self
                .latency
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            LatencyPercentiles::from_histogram(&histogram)
        };
        MetricsSnapshot {
            timestamp: Utc::now(),
            state,
            running: state == EngineState::Running,
            rps: self.current_rps(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            latency,
        }
    }
}
