//! In-process metrics: cycle identifiers, stage/language/phrase timings and
//! counters. Timings keep all-time totals plus a window of recent samples for
//! percentiles; `report()` is logged when the engine stops.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_WINDOW: usize = 512;

/// Identifiers attached to every log line of one cycle.
#[derive(Debug, Clone)]
pub struct CycleIds {
    pub trace_id: String,
    /// Monotonic count of cycles started by this process.
    pub generation: u64,
}

/// Running timer; recorded under its metric name on `finish`.
pub struct TimingSpan {
    name: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.registry.record(self.name, elapsed);
        elapsed
    }
}

#[derive(Default)]
struct Timing {
    count: u64,
    total: Duration,
    max: Duration,
    recent: VecDeque<Duration>,
}

impl Timing {
    fn add(&mut self, sample: Duration, window: usize) {
        self.count += 1;
        self.total += sample;
        self.max = self.max.max(sample);
        if self.recent.len() == window {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
    }

    /// Nearest-rank percentile over the recent window.
    fn percentile(&self, p: f64) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsReport {
    pub cycles: u64,
    pub timings: BTreeMap<String, TimingSummary>,
    pub counters: BTreeMap<String, u64>,
}

pub struct MetricsRegistry {
    timings: Mutex<HashMap<&'static str, Timing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    generation: AtomicU64,
    window: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Registry keeping the last `window` samples of each timing.
    pub fn with_window(window: usize) -> Self {
        Self {
            timings: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            window: window.max(1),
        }
    }

    pub fn next_cycle(&self) -> CycleIds {
        CycleIds {
            trace_id: uuid::Uuid::new_v4().to_string(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub fn record(&self, name: &'static str, elapsed: Duration) {
        self.timings
            .lock()
            .entry(name)
            .or_default()
            .add(elapsed, self.window);
        tracing::trace!(metric = name, elapsed_us = elapsed.as_micros() as u64, "timing recorded");
    }

    pub fn increment(&self, name: &'static str, by: u64) {
        *self.counters.lock().entry(name).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// `p` in 0..=100 over the recent window; zero for unknown metrics.
    pub fn percentile(&self, name: &str, p: f64) -> Duration {
        self.timings
            .lock()
            .get(name)
            .map(|t| t.percentile(p))
            .unwrap_or(Duration::ZERO)
    }

    pub fn sample_count(&self, name: &str) -> u64 {
        self.timings.lock().get(name).map(|t| t.count).unwrap_or(0)
    }

    pub fn report(&self) -> MetricsReport {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let timings = self
            .timings
            .lock()
            .iter()
            .map(|(&name, t)| {
                let mean = if t.count == 0 { 0.0 } else { ms(t.total) / t.count as f64 };
                let summary = TimingSummary {
                    count: t.count,
                    mean_ms: mean,
                    p50_ms: ms(t.percentile(50.0)),
                    p95_ms: ms(t.percentile(95.0)),
                    max_ms: ms(t.max),
                };
                (name.to_string(), summary)
            })
            .collect();
        let counters = self
            .counters
            .lock()
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect();
        MetricsReport {
            cycles: self.generation.load(Ordering::Relaxed),
            timings,
            counters,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub mod metric_names {
    pub const CYCLE: &str = "cycle";
    pub const STAGE_CHECK: &str = "stage.check";
    pub const STAGE_LANGUAGE_NAMES: &str = "stage.language_names";
    pub const STAGE_FRONTEND: &str = "stage.frontend";
    pub const STAGE_BACKEND: &str = "stage.backend";
    pub const STAGE_STORING: &str = "stage.storing";
    pub const LANGUAGE: &str = "language";
    pub const PHRASE: &str = "phrase";

    pub const PHRASES_TRANSLATED: &str = "phrases_translated";
    pub const PHRASES_FAILED: &str = "phrases_failed";
    pub const CACHE_HITS: &str = "cache_hits";
    pub const TICKS_DROPPED: &str = "ticks_dropped";
}
