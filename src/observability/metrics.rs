//! Fiber lifecycle metrics.
//!
//! Atomic counters, gauges, and histograms, plus the [`FiberMetrics`] set the
//! runtime updates when the `RuntimeMetrics` flag is enabled.

use crate::types::{Exit, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    value: AtomicU64,
}

impl Counter {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    value: AtomicI64,
}

impl Gauge {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the gauge name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A histogram with fixed upper bucket bounds.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64, // f64 bits
    count: AtomicU64,
}

impl Histogram {
    pub(crate) fn new(name: impl Into<String>, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(f64::total_cmp);
        let counts = (0..=buckets.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            name: name.into(),
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let idx = self
            .buckets
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.buckets.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Per-bucket counts. The last entry counts observations above every
    /// bound.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Upper bounds of the buckets.
    pub fn bounds(&self) -> &[f64] {
        &self.buckets
    }

    /// Returns the histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lifetime buckets, in milliseconds.
const LIFETIME_BUCKETS_MS: [f64; 8] = [1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1_000.0, 10_000.0];

/// Fiber lifecycle metrics for one runtime.
#[derive(Debug)]
pub struct FiberMetrics {
    started: Counter,
    successes: Counter,
    failures: Counter,
    active: Gauge,
    lifetimes: Histogram,
}

impl Default for FiberMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberMetrics {
    /// Creates an empty metrics set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Counter::new("fibers_started"),
            successes: Counter::new("fiber_successes"),
            failures: Counter::new("fiber_failures"),
            active: Gauge::new("fibers_active"),
            lifetimes: Histogram::new("fiber_lifetime_ms", LIFETIME_BUCKETS_MS.to_vec()),
        }
    }

    pub(crate) fn record_start(&self) {
        self.started.increment();
        self.active.increment();
    }

    pub(crate) fn record_exit(&self, exit: &Exit<Value, Value>, lifetime_millis: u64) {
        if exit.is_success() {
            self.successes.increment();
        } else {
            self.failures.increment();
        }
        self.active.decrement();
        #[allow(clippy::cast_precision_loss)]
        let lifetime = lifetime_millis as f64;
        self.lifetimes.observe(lifetime);
    }

    /// Fibers started.
    pub fn started(&self) -> &Counter {
        &self.started
    }

    /// Fibers that exited successfully.
    pub fn successes(&self) -> &Counter {
        &self.successes
    }

    /// Fibers that exited with a failure.
    pub fn failures(&self) -> &Counter {
        &self.failures
    }

    /// Fibers started and not yet exited.
    pub fn active(&self) -> &Gauge {
        &self.active
    }

    /// Fiber lifetimes in milliseconds.
    pub fn lifetimes(&self) -> &Histogram {
        &self.lifetimes
    }

    /// A plain copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fibers_started: self.started.get(),
            fiber_successes: self.successes.get(),
            fiber_failures: self.failures.get(),
            fibers_active: self.active.get(),
            lifetime_count: self.lifetimes.count(),
            lifetime_sum_ms: self.lifetimes.sum(),
        }
    }
}

/// Point-in-time values of [`FiberMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsSnapshot {
    /// Fibers started.
    pub fibers_started: u64,
    /// Fibers that exited successfully.
    pub fiber_successes: u64,
    /// Fibers that exited with a failure.
    pub fiber_failures: u64,
    /// Fibers started and not yet exited.
    pub fibers_active: i64,
    /// Recorded lifetimes.
    pub lifetime_count: u64,
    /// Sum of recorded lifetimes, in milliseconds.
    pub lifetime_sum_ms: f64,
}
