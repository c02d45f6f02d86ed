//! Pipeline metrics
//!
//! Counters, gauges and a latency histogram for shard loading and batch
//! generation, rendered in the Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.get()
        )
    }
}

/// Cumulative latency histogram (seconds)
pub struct LatencyHistogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl LatencyHistogram {
    /// Create with default buckets, tuned for local disk reads
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
    }

    pub fn with_buckets(name: &'static str, help: &'static str, bounds: Vec<f64>) -> Self {
        Self {
            buckets: bounds.into_iter().map(|b| (b, AtomicU64::new(0))).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if seconds <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Time a closure and record the duration
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {name} {help}\n# TYPE {name} histogram\n",
            name = self.name,
            help = self.help
        );

        for (bound, count) in &self.buckets {
            let _ = writeln!(
                output,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            );
        }
        let count = self.count();
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", self.name, count);
        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(output, "{}_sum {}", self.name, sum_secs);
        let _ = writeln!(output, "{}_count {}", self.name, count);

        output
    }
}

/// Metrics shared by every class collection and merger of one pipeline
pub struct PipelineMetrics {
    pub shards_loaded: Counter,
    pub shards_excluded: Counter,
    pub batches_yielded: Counter,
    pub events_yielded: Counter,
    pub weight_rebuilds: Counter,
    pub resident_rows: Gauge,
    pub shard_load_seconds: LatencyHistogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            shards_loaded: Counter::new(
                "jetfeed_shards_loaded_total",
                "Shard files loaded into memory",
            ),
            shards_excluded: Counter::new(
                "jetfeed_shards_excluded_total",
                "Base shard files dropped at registration for missing siblings",
            ),
            batches_yielded: Counter::new(
                "jetfeed_batches_yielded_total",
                "Merged batches handed to the consumer",
            ),
            events_yielded: Counter::new(
                "jetfeed_events_yielded_total",
                "Events contained in merged batches",
            ),
            weight_rebuilds: Counter::new(
                "jetfeed_weight_rebuilds_total",
                "Pt-weight histogram rebuilds",
            ),
            resident_rows: Gauge::new(
                "jetfeed_resident_rows",
                "Shard rows held in memory across all sources",
            ),
            shard_load_seconds: LatencyHistogram::new(
                "jetfeed_shard_load_duration_seconds",
                "Shard file read latency",
            ),
        }
    }

    /// Export all metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str(&self.shards_loaded.to_prometheus());
        output.push_str(&self.shards_excluded.to_prometheus());
        output.push_str(&self.batches_yielded.to_prometheus());
        output.push_str(&self.events_yielded.to_prometheus());
        output.push_str(&self.weight_rebuilds.to_prometheus());
        output.push_str(&self.resident_rows.to_prometheus());
        output.push_str(&self.shard_load_seconds.to_prometheus());
        output
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
