use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per series; older samples are dropped
pub const LATENCY_WINDOW: usize = 1024;

/// How an analysis request was ultimately answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Cloud,
    Local,
    Unavailable,
}

/// Process-wide metrics collector.
///
/// Cheap to clone and safe to share between concurrent analyses.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Outcomes
    analyses_total: AtomicUsize,
    cloud_results: AtomicUsize,
    local_results: AtomicUsize,
    unavailable_results: AtomicUsize,
    analysis_latency_ms: RwLock<VecDeque<u64>>,

    // Cloud attempts
    cloud_attempts_success: AtomicUsize,
    cloud_attempts_failed: AtomicUsize,
    cloud_latency_ms: RwLock<VecDeque<u64>>,
    cloud_successes_by_model: DashMap<String, AtomicUsize>,
    circuit_breaker_trips: AtomicUsize,

    // Local pipeline
    classifier_loads: AtomicUsize,
    classifier_failures: AtomicUsize,
    palette_failures: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                analyses_total: AtomicUsize::new(0),
                cloud_results: AtomicUsize::new(0),
                local_results: AtomicUsize::new(0),
                unavailable_results: AtomicUsize::new(0),
                analysis_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                cloud_attempts_success: AtomicUsize::new(0),
                cloud_attempts_failed: AtomicUsize::new(0),
                cloud_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                cloud_successes_by_model: DashMap::new(),
                circuit_breaker_trips: AtomicUsize::new(0),
                classifier_loads: AtomicUsize::new(0),
                classifier_failures: AtomicUsize::new(0),
                palette_failures: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_analysis(&self, outcome: Outcome, duration: Duration) {
        self.inner.analyses_total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Cloud => &self.inner.cloud_results,
            Outcome::Local => &self.inner.local_results,
            Outcome::Unavailable => &self.inner.unavailable_results,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        push_sample(&self.inner.analysis_latency_ms, duration);
    }

    pub fn record_cloud_attempt(&self, model: &str, success: bool, duration: Duration) {
        if success {
            self.inner.cloud_attempts_success.fetch_add(1, Ordering::Relaxed);
            self.inner
                .cloud_successes_by_model
                .entry(model.to_string())
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.cloud_attempts_failed.fetch_add(1, Ordering::Relaxed);
        }
        push_sample(&self.inner.cloud_latency_ms, duration);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_load(&self) {
        self.inner.classifier_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_failure(&self) {
        self.inner.classifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_palette_failure(&self) {
        self.inner.palette_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let analysis_latency = self.inner.analysis_latency_ms.read();
        let analysis_latency_avg_ms = avg(&analysis_latency);
        let analysis_latency_p95_ms = percentile(&analysis_latency, 0.95);
        drop(analysis_latency);

        let cloud_latency = self.inner.cloud_latency_ms.read();
        let cloud_latency_avg_ms = avg(&cloud_latency);
        drop(cloud_latency);

        let mut cloud_successes_by_model: Vec<(String, usize)> = self
            .inner
            .cloud_successes_by_model
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        cloud_successes_by_model.sort();

        MetricsSnapshot {
            analyses_total: self.inner.analyses_total.load(Ordering::Relaxed),
            cloud_results: self.inner.cloud_results.load(Ordering::Relaxed),
            local_results: self.inner.local_results.load(Ordering::Relaxed),
            unavailable_results: self.inner.unavailable_results.load(Ordering::Relaxed),
            analysis_latency_avg_ms,
            analysis_latency_p95_ms,
            cloud_attempts_success: self.inner.cloud_attempts_success.load(Ordering::Relaxed),
            cloud_attempts_failed: self.inner.cloud_attempts_failed.load(Ordering::Relaxed),
            cloud_latency_avg_ms,
            cloud_successes_by_model,
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            classifier_loads: self.inner.classifier_loads.load(Ordering::Relaxed),
            classifier_failures: self.inner.classifier_failures.load(Ordering::Relaxed),
            palette_failures: self.inner.palette_failures.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition of the current snapshot
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP analyses_total Analyses by outcome
# TYPE analyses_total counter
analyses_total {{outcome="cloud"}} {}
analyses_total {{outcome="local"}} {}
analyses_total {{outcome="unavailable"}} {}

# HELP analysis_latency_avg_ms Average end-to-end analysis latency
# TYPE analysis_latency_avg_ms gauge
analysis_latency_avg_ms {{}} {}

# HELP cloud_attempts_total Hosted model attempts by result
# TYPE cloud_attempts_total counter
cloud_attempts_total {{result="success"}} {}
cloud_attempts_total {{result="failure"}} {}

# HELP circuit_breaker_trips_total Times the provider circuit opened
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {{}} {}

# HELP classifier_loads_total Local classifier loads
# TYPE classifier_loads_total counter
classifier_loads_total {{}} {}

# HELP classifier_failures_total Local classifications that failed
# TYPE classifier_failures_total counter
classifier_failures_total {{}} {}

# HELP palette_failures_total Palette extractions that failed
# TYPE palette_failures_total counter
palette_failures_total {{}} {}
"#,
            snapshot.cloud_results,
            snapshot.local_results,
            snapshot.unavailable_results,
            snapshot.analysis_latency_avg_ms,
            snapshot.cloud_attempts_success,
            snapshot.cloud_attempts_failed,
            snapshot.circuit_breaker_trips,
            snapshot.classifier_loads,
            snapshot.classifier_failures,
            snapshot.palette_failures,
        );

        if !snapshot.cloud_successes_by_model.is_empty() {
            out.push_str("\n# HELP cloud_model_successes_total Successful attempts per model\n");
            out.push_str("# TYPE cloud_model_successes_total counter\n");
            for (model, count) in &snapshot.cloud_successes_by_model {
                out.push_str(&format!(
                    "cloud_model_successes_total {{model=\"{}\"}} {}\n",
                    model, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub analyses_total: usize,
    pub cloud_results: usize,
    pub local_results: usize,
    pub unavailable_results: usize,
    pub analysis_latency_avg_ms: u64,
    pub analysis_latency_p95_ms: u64,
    pub cloud_attempts_success: usize,
    pub cloud_attempts_failed: usize,
    pub cloud_latency_avg_ms: u64,
    pub cloud_successes_by_model: Vec<(String, usize)>,
    pub circuit_breaker_trips: usize,
    pub classifier_loads: usize,
    pub classifier_failures: usize,
    pub palette_failures: usize,
    pub uptime_seconds: u64,
}

fn push_sample(window: &RwLock<VecDeque<u64>>, duration: Duration) {
    let mut window = window.write();
    if window.len() == LATENCY_WINDOW {
        window.pop_front();
    }
    window.push_back(duration.as_millis() as u64);
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
