use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    pub source_id: String,
    pub cycle_id: u64,
    pub pnl: f64,
    pub win: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct SourceHistory {
    records: Vec<PerformanceRecord>,
    wins: usize,
    total_pnl: f64,
    decayed_score: f64,
}

/// Append-only per-source outcome history with an exponentially decayed score.
#[derive(Debug)]
pub struct PerformanceTracker {
    decay_factor: f64,
    histories: HashMap<String, SourceHistory>,
}

impl PerformanceTracker {
    pub fn new(decay_factor: f64) -> Self {
        Self {
            decay_factor: decay_factor.clamp(0.0, 1.0),
            histories: HashMap::new(),
        }
    }

    pub fn record_cycle(&mut self, source_id: &str, cycle_id: u64, pnl: f64) -> &PerformanceRecord {
        let d = self.decay_factor;
        let history = self.histories.entry(source_id.to_string()).or_default();

        let win = pnl > 0.0;
        if win {
            history.wins += 1;
        }
        history.total_pnl += pnl;
        history.decayed_score = d * history.decayed_score + (1.0 - d) * pnl;

        history.records.push(PerformanceRecord {
            source_id: source_id.to_string(),
            cycle_id,
            pnl,
            win,
            recorded_at: Utc::now(),
        });

        tracing::debug!(
            "📈 Source '{}' cycle {}: pnl={:.4} decayed={:.4}",
            source_id,
            cycle_id,
            pnl,
            history.decayed_score
        );

        &history.records[history.records.len() - 1]
    }

    /// 0 for a source with no records.
    pub fn win_rate(&self, source_id: &str) -> f64 {
        self.histories
            .get(source_id)
            .filter(|h| !h.records.is_empty())
            .map(|h| h.wins as f64 / h.records.len() as f64)
            .unwrap_or(0.0)
    }

    pub fn decayed_score(&self, source_id: &str) -> f64 {
        self.histories
            .get(source_id)
            .map(|h| h.decayed_score)
            .unwrap_or(0.0)
    }

    pub fn total_pnl(&self, source_id: &str) -> f64 {
        self.histories.get(source_id).map(|h| h.total_pnl).unwrap_or(0.0)
    }

    pub fn cycles(&self, source_id: &str) -> usize {
        self.histories.get(source_id).map(|h| h.records.len()).unwrap_or(0)
    }

    pub fn records_for(&self, source_id: &str) -> &[PerformanceRecord] {
        self.histories
            .get(source_id)
            .map(|h| h.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn decayed_scores(&self) -> HashMap<String, f64> {
        self.histories
            .iter()
            .map(|(id, h)| (id.clone(), h.decayed_score))
            .collect()
    }

    /// Drops a removed source's history so it does not skew later means.
    pub fn forget(&mut self, source_id: &str) {
        self.histories.remove(source_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_rate_and_totals() {
        let mut tracker = PerformanceTracker::new(0.9);
        tracker.record_cycle("a", 1, 2.0);
        tracker.record_cycle("a", 2, -1.0);
        tracker.record_cycle("a", 3, 0.0);
        tracker.record_cycle("a", 4, 3.0);

        assert_eq!(tracker.win_rate("a"), 0.5);
        assert_eq!(tracker.total_pnl("a"), 4.0);
        assert_eq!(tracker.cycles("a"), 4);
        assert!(!tracker.records_for("a")[2].win);
    }

    #[test]
    fn test_unknown_source_defaults() {
        let tracker = PerformanceTracker::new(0.9);
        assert_eq!(tracker.win_rate("ghost"), 0.0);
        assert_eq!(tracker.decayed_score("ghost"), 0.0);
        assert!(tracker.records_for("ghost").is_empty());
    }

    #[test]
    fn test_decayed_score_recurrence() {
        let mut tracker = PerformanceTracker::new(0.5);
        tracker.record_cycle("a", 1, 4.0);
        assert!((tracker.decayed_score("a") - 2.0).abs() < 1e-12);
        tracker.record_cycle("a", 2, 0.0);
        assert!((tracker.decayed_score("a") - 1.0).abs() < 1e-12);
        tracker.record_cycle("a", 3, -2.0);
        assert!((tracker.decayed_score("a") - (-0.5)).abs() < 1e-12);
    }
}
