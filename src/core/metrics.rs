use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters shared by the consensus engine and the scheduler.
#[derive(Debug)]
pub struct EngineMetrics {
    signals_processed: AtomicU64,
    signals_bypassed: AtomicU64,
    consensus_declared: AtomicU64,
    degraded_results: AtomicU64,
    sources_excluded: AtomicU64,
    source_timeouts: AtomicU64,
    cycles_completed: AtomicU64,
    rebalances: AtomicU64,
    total_evaluation_ms: AtomicU64,
    evaluation_samples: AtomicU64,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            signals_processed: AtomicU64::new(0),
            signals_bypassed: AtomicU64::new(0),
            consensus_declared: AtomicU64::new(0),
            degraded_results: AtomicU64::new(0),
            sources_excluded: AtomicU64::new(0),
            source_timeouts: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            rebalances: AtomicU64::new(0),
            total_evaluation_ms: AtomicU64::new(0),
            evaluation_samples: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_signals_processed(&self) {
        self.signals_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bypassed(&self) {
        self.signals_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_consensus_declared(&self) {
        self.consensus_declared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_degraded(&self) {
        self.degraded_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_excluded(&self, timed_out: bool) {
        self.sources_excluded.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.source_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_cycles(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rebalances(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation_latency(&self, latency: Duration) {
        self.total_evaluation_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.evaluation_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_signals_processed(&self) -> u64 {
        self.signals_processed.load(Ordering::Relaxed)
    }

    pub fn get_bypassed(&self) -> u64 {
        self.signals_bypassed.load(Ordering::Relaxed)
    }

    pub fn get_degraded(&self) -> u64 {
        self.degraded_results.load(Ordering::Relaxed)
    }

    pub fn get_excluded(&self) -> u64 {
        self.sources_excluded.load(Ordering::Relaxed)
    }

    pub fn get_timeouts(&self) -> u64 {
        self.source_timeouts.load(Ordering::Relaxed)
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn get_rebalances(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }

    pub fn get_average_evaluation_ms(&self) -> f64 {
        let total = self.total_evaluation_ms.load(Ordering::Relaxed);
        let samples = self.evaluation_samples.load(Ordering::Relaxed);

        if samples == 0 {
            0.0
        } else {
            total as f64 / samples as f64
        }
    }

    /// Share of processed signals that ended in a neutral fallback.
    pub fn get_degradation_rate(&self) -> f64 {
        let processed = self.get_signals_processed();
        if processed == 0 {
            0.0
        } else {
            self.get_degraded() as f64 / processed as f64
        }
    }

    pub fn get_snapshot(&self) -> HashMap<String, serde_json::Value> {
        let mut snapshot = HashMap::new();

        snapshot.insert("signals_processed".to_string(), serde_json::json!(self.get_signals_processed()));
        snapshot.insert("signals_bypassed".to_string(), serde_json::json!(self.get_bypassed()));
        snapshot.insert(
            "consensus_declared".to_string(),
            serde_json::json!(self.consensus_declared.load(Ordering::Relaxed)),
        );
        snapshot.insert("degraded_results".to_string(), serde_json::json!(self.get_degraded()));
        snapshot.insert("sources_excluded".to_string(), serde_json::json!(self.get_excluded()));
        snapshot.insert("source_timeouts".to_string(), serde_json::json!(self.get_timeouts()));
        snapshot.insert("cycles_completed".to_string(), serde_json::json!(self.get_cycles()));
        snapshot.insert("rebalances".to_string(), serde_json::json!(self.get_rebalances()));
        snapshot.insert(
            "average_evaluation_ms".to_string(),
            serde_json::json!(self.get_average_evaluation_ms()),
        );
        snapshot.insert(
            "degradation_rate".to_string(),
            serde_json::json!(self.get_degradation_rate()),
        );
        snapshot.insert(
            "uptime_secs".to_string(),
            serde_json::json!(self.start_time.elapsed().as_secs()),
        );

        snapshot
    }

    pub fn print_report(&self) {
        tracing::info!(
            "
╔══════════════════════════════════════════════════════════════════════╗
║              CONSENSUS ENGINE METRICS                               ║
╚══════════════════════════════════════════════════════════════════════╝

📊 Signals:
   • Processed:          {}
   • Bypassed:           {}
   • Degraded:           {} ({:.1}%)

🧩 Sources:
   • Excluded:           {}
   • Timeouts:           {}
   • Avg Evaluation:     {:.2} ms

🏆 Tournament:
   • Cycles:             {}
   • Rebalances:         {}
   • Uptime:             {} seconds
",
            self.get_signals_processed(),
            self.get_bypassed(),
            self.get_degraded(),
            self.get_degradation_rate() * 100.0,
            self.get_excluded(),
            self.get_timeouts(),
            self.get_average_evaluation_ms(),
            self.get_cycles(),
            self.get_rebalances(),
            self.start_time.elapsed().as_secs(),
        );
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
