//! In-process apply latency histogram, rendered as Prometheus text on `/metrics`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APPLY_DURATION_SECONDS: &str = "kvapply_apply_duration_seconds";

/// Protocol tag of every command applied through the dispatcher.
pub const V3_VERSION: &str = "v3";

const BUCKET_COUNT: usize = 20;
const BUCKET_START_SECONDS: f64 = 0.0001;

/// Upper bounds: 0.0001s doubling twenty times.
pub fn bucket_bounds() -> [f64; BUCKET_COUNT] {
    let mut bounds = [0.0; BUCKET_COUNT];
    for (i, bound) in bounds.iter_mut().enumerate() {
        *bound = BUCKET_START_SECONDS * f64::from(1u32 << i);
    }
    bounds
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    version: &'static str,
    op: &'static str,
    success: bool,
}

#[derive(Debug, Default)]
struct Histogram {
    /// Non-cumulative per-bucket counts; observations above the last bound only hit `count`.
    buckets: [AtomicU64; BUCKET_COUNT],
    count: AtomicU64,
    sum_ns: AtomicU64,
}

impl Histogram {
    fn observe(&self, took: Duration, bounds: &[f64; BUCKET_COUNT]) {
        let secs = took.as_secs_f64();
        if let Some(idx) = bounds.iter().position(|bound| secs <= *bound) {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns
            .fetch_add(took.as_nanos().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct ApplyMetrics {
    bounds: [f64; BUCKET_COUNT],
    series: Mutex<BTreeMap<SeriesKey, Arc<Histogram>>>,
}

impl Default for ApplyMetrics {
    fn default() -> Self {
        Self {
            bounds: bucket_bounds(),
            series: Mutex::new(BTreeMap::new()),
        }
    }
}

impl ApplyMetrics {
    pub fn observe(&self, version: &'static str, op: &'static str, success: bool, took: Duration) {
        let key = SeriesKey {
            version,
            op,
            success,
        };
        let histogram = {
            let mut series = self
                .series
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(series.entry(key).or_default())
        };
        histogram.observe(took, &self.bounds);
    }

    /// Observations recorded for one label set.
    pub fn count(&self, op: &str, success: bool) -> u64 {
        let series = self
            .series
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        series
            .iter()
            .filter(|(key, _)| key.op == op && key.success == success)
            .map(|(_, h)| h.count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn render_prometheus(&self) -> String {
        let series = self
            .series
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# HELP {APPLY_DURATION_SECONDS} The latency distributions of applying committed commands."
        );
        let _ = writeln!(out, "# TYPE {APPLY_DURATION_SECONDS} histogram");
        for (key, histogram) in series.iter() {
            let labels = format!(
                "version=\"{}\",op=\"{}\",success=\"{}\"",
                key.version, key.op, key.success
            );
            let mut cumulative = 0;
            for (bound, bucket) in self.bounds.iter().zip(histogram.buckets.iter()) {
                cumulative += bucket.load(Ordering::Relaxed);
                let _ = writeln!(
                    out,
                    "{APPLY_DURATION_SECONDS}_bucket{{{labels},le=\"{bound}\"}} {cumulative}"
                );
            }
            let count = histogram.count.load(Ordering::Relaxed);
            let sum = histogram.sum_ns.load(Ordering::Relaxed) as f64 / 1e9;
            let _ = writeln!(
                out,
                "{APPLY_DURATION_SECONDS}_bucket{{{labels},le=\"+Inf\"}} {count}"
            );
            let _ = writeln!(out, "{APPLY_DURATION_SECONDS}_sum{{{labels}}} {sum}");
            let _ = writeln!(out, "{APPLY_DURATION_SECONDS}_count{{{labels}}} {count}");
        }
        out
    }
}
