use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::core::{EngineError, EngineResult, TournamentConfig};

const SUM_TOLERANCE: f64 = 1e-12;
const MAX_BISECTIONS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightState {
    pub source_id: String,
    pub weight: f64,
    pub last_updated: DateTime<Utc>,
}

/// Immutable, versioned set of source weights. Sorted by source id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSnapshot {
    pub version: u64,
    pub states: Vec<WeightState>,
}

impl WeightSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            states: Vec::new(),
        }
    }

    pub fn weight(&self, source_id: &str) -> Option<f64> {
        self.states
            .iter()
            .find(|s| s.source_id == source_id)
            .map(|s| s.weight)
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        self.states
            .iter()
            .map(|s| (s.source_id.clone(), s.weight))
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.states.iter().map(|s| s.source_id.as_str()).collect()
    }

    pub fn total(&self) -> f64 {
        self.states.iter().map(|s| s.weight).sum()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    initial_weight: f64,
    joined_version: u64,
}

struct Ledger {
    snapshot: Arc<WeightSnapshot>,
    members: HashMap<String, Membership>,
}

/// Holder of the current weight snapshot.
///
/// Readers clone the `Arc` and keep a consistent view for as long as they
/// need it. Writers build the next snapshot completely and swap it in.
pub struct WeightBook {
    current: RwLock<Ledger>,
    min_weight: f64,
}

impl WeightBook {
    pub fn new(min_weight: f64) -> Self {
        Self {
            current: RwLock::new(Ledger {
                snapshot: Arc::new(WeightSnapshot::empty()),
                members: HashMap::new(),
            }),
            min_weight,
        }
    }

    pub async fn snapshot(&self) -> Arc<WeightSnapshot> {
        self.current.read().await.snapshot.clone()
    }

    /// Version at which each current source joined. A source removed and
    /// registered again gets a new version.
    pub async fn memberships(&self) -> HashMap<String, u64> {
        self.current
            .read()
            .await
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.joined_version))
            .collect()
    }

    /// Adds a source at `initial_weight` and renormalizes onto the simplex
    /// with the floor intact.
    ///
    /// Existing sources keep their current ratios over the registration mass
    /// they brought in, so sources registered at equal weights end up equal
    /// whatever the order.
    pub async fn register(&self, source_id: &str, initial_weight: f64) -> EngineResult<Arc<WeightSnapshot>> {
        let mut ledger = self.current.write().await;
        if ledger.snapshot.weight(source_id).is_some() {
            return Err(EngineError::config(format!("source '{}' already has a weight", source_id)));
        }

        let initial_weight = initial_weight.clamp(self.min_weight, 1.0);
        let registered_mass: f64 = ledger
            .snapshot
            .states
            .iter()
            .filter_map(|s| ledger.members.get(&s.source_id).map(|m| m.initial_weight))
            .sum();

        let mut ids: Vec<String> = ledger.snapshot.states.iter().map(|s| s.source_id.clone()).collect();
        let mut targets: Vec<f64> = ledger
            .snapshot
            .states
            .iter()
            .map(|s| s.weight * registered_mass)
            .collect();
        ids.push(source_id.to_string());
        targets.push(initial_weight);

        let weights = self.normalize(&targets)?;
        let next = Self::build(ledger.snapshot.version + 1, ids, weights);
        ledger.members.insert(
            source_id.to_string(),
            Membership {
                initial_weight,
                joined_version: next.version,
            },
        );
        ledger.snapshot = next.clone();

        tracing::info!("⚖️ Weight book v{}: '{}' joined with {:.4}", next.version, source_id, next.weight(source_id).unwrap_or(0.0));
        Ok(next)
    }

    /// Drops a source's weight and renormalizes the rest. Unknown ids are a no-op.
    pub async fn remove(&self, source_id: &str) -> EngineResult<Arc<WeightSnapshot>> {
        let mut ledger = self.current.write().await;
        if ledger.snapshot.weight(source_id).is_none() {
            return Ok(ledger.snapshot.clone());
        }

        let (ids, targets): (Vec<String>, Vec<f64>) = ledger
            .snapshot
            .states
            .iter()
            .filter(|s| s.source_id != source_id)
            .map(|s| (s.source_id.clone(), s.weight))
            .unzip();

        let weights = if targets.is_empty() {
            Vec::new()
        } else {
            self.normalize(&targets)?
        };
        let next = Self::build(ledger.snapshot.version + 1, ids, weights);
        ledger.members.remove(source_id);
        ledger.snapshot = next.clone();

        tracing::info!("⚖️ Weight book v{}: '{}' removed", next.version, source_id);
        Ok(next)
    }

    /// Swaps in a fully built set of states. The caller computed them from
    /// `expected_version`; a concurrent writer in between is a conflict.
    pub async fn publish(&self, expected_version: u64, states: Vec<WeightState>) -> EngineResult<Arc<WeightSnapshot>> {
        let mut ledger = self.current.write().await;
        if ledger.snapshot.version != expected_version {
            return Err(EngineError::conflict(format!(
                "weight book moved from v{} to v{} during rebalance",
                expected_version, ledger.snapshot.version
            )));
        }

        let mut states = states;
        states.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        let next = Arc::new(WeightSnapshot {
            version: ledger.snapshot.version + 1,
            states,
        });
        ledger.snapshot = next.clone();
        Ok(next)
    }

    fn normalize(&self, targets: &[f64]) -> EngineResult<Vec<f64>> {
        let n = targets.len();
        if n as f64 * self.min_weight > 1.0 + SUM_TOLERANCE {
            return Err(EngineError::config(format!(
                "{} sources cannot each hold the minimum weight {}",
                n, self.min_weight
            )));
        }
        let lo = vec![self.min_weight; n];
        let hi = vec![1.0; n];
        project_onto_simplex(targets, &lo, &hi)
    }

    fn build(version: u64, ids: Vec<String>, weights: Vec<f64>) -> Arc<WeightSnapshot> {
        let now = Utc::now();
        let mut states: Vec<WeightState> = ids
            .into_iter()
            .zip(weights)
            .map(|(source_id, weight)| WeightState {
                source_id,
                weight,
                last_updated: now,
            })
            .collect();
        states.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Arc::new(WeightSnapshot { version, states })
    }
}

/// Scales `targets` by the factor `c` for which `Σ clamp(c·tᵢ, loᵢ, hiᵢ) = 1`.
///
/// Plain division by the total is tried first and kept whenever it already
/// respects every bound. Requires `Σlo ≤ 1 ≤ Σhi`.
pub fn project_onto_simplex(targets: &[f64], lo: &[f64], hi: &[f64]) -> EngineResult<Vec<f64>> {
    let apply = |c: f64| -> Vec<f64> {
        targets
            .iter()
            .zip(lo.iter().zip(hi))
            .map(|(t, (l, h))| (c * t).clamp(*l, *h))
            .collect()
    };
    let sum_at = |c: f64| -> f64 { apply(c).iter().sum() };

    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let lo_sum: f64 = lo.iter().sum();
    let hi_sum: f64 = hi.iter().sum();
    if lo_sum > 1.0 + SUM_TOLERANCE || hi_sum < 1.0 - SUM_TOLERANCE {
        return Err(EngineError::config(format!(
            "weight bounds [{:.4}, {:.4}] cannot reach a unit total",
            lo_sum, hi_sum
        )));
    }

    let total: f64 = targets.iter().sum();
    if total > 0.0 {
        let c = 1.0 / total;
        let within = targets
            .iter()
            .zip(lo.iter().zip(hi))
            .all(|(t, (l, h))| t * c >= l - SUM_TOLERANCE && t * c <= h + SUM_TOLERANCE);
        if within {
            return Ok(apply(c));
        }
    }

    // f(c) is monotone in c; grow the upper bracket until it covers 1.
    let mut low = 0.0_f64;
    let mut high = if total > 0.0 { 1.0 / total } else { 1.0 };
    let mut grow = 0;
    while sum_at(high) < 1.0 {
        low = high;
        high *= 2.0;
        grow += 1;
        if grow > 1024 {
            return Err(EngineError::config("weight targets cannot be normalized"));
        }
    }

    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (low + high);
        let sum = sum_at(mid);
        if (sum - 1.0).abs() < SUM_TOLERANCE {
            return Ok(apply(mid));
        }
        if sum < 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }

    Ok(apply(0.5 * (low + high)))
}

/// Performance-driven weight adjustment gated by the rebalance period.
pub struct WeightRebalancer {
    config: TournamentConfig,
    last_rebalance: Instant,
}

impl WeightRebalancer {
    pub fn new(config: TournamentConfig) -> Self {
        Self {
            config,
            last_rebalance: Instant::now(),
        }
    }

    pub fn should_rebalance(&self, now: Instant) -> bool {
        self.config.enable_rebalancing
            && now.saturating_duration_since(self.last_rebalance) >= self.config.rebalance_period()
    }

    /// Computes the next weights from decayed performance scores. Sources
    /// without a score count as 0. Pure: the book is not touched.
    pub fn plan(&self, current: &WeightSnapshot, scores: &HashMap<String, f64>) -> EngineResult<Vec<WeightState>> {
        if current.is_empty() {
            return Ok(Vec::new());
        }

        let delta = self.config.max_weight_delta;
        let min_weight = self.config.min_weight;
        let n = current.len() as f64;

        let score_of = |id: &str| scores.get(id).copied().unwrap_or(0.0);
        let mean = current.states.iter().map(|s| score_of(&s.source_id)).sum::<f64>() / n;

        let targets: Vec<f64> = current
            .states
            .iter()
            .map(|s| {
                let raw_delta =
                    ((score_of(&s.source_id) - mean) * self.config.adjustment_factor).clamp(-delta, delta);
                (s.weight + raw_delta).clamp(min_weight, 1.0)
            })
            .collect();

        let lo: Vec<f64> = current
            .states
            .iter()
            .map(|s| (s.weight - delta).max(min_weight))
            .collect();
        let hi: Vec<f64> = current
            .states
            .iter()
            .map(|s| (s.weight + delta).min(1.0))
            .collect();

        let weights = project_onto_simplex(&targets, &lo, &hi)?;
        let now = Utc::now();

        Ok(current
            .states
            .iter()
            .zip(weights)
            .map(|(state, weight)| WeightState {
                source_id: state.source_id.clone(),
                weight,
                last_updated: if weight == state.weight { state.last_updated } else { now },
            })
            .collect())
    }

    /// Rebalances and publishes when the period has elapsed. Returns the new
    /// snapshot, or `None` when the gate is closed.
    pub async fn rebalance_weights(
        &mut self,
        book: &WeightBook,
        scores: &HashMap<String, f64>,
    ) -> EngineResult<Option<Arc<WeightSnapshot>>> {
        let now = Instant::now();
        if !self.should_rebalance(now) {
            tracing::debug!("⏳ Rebalance gate closed");
            return Ok(None);
        }

        let current = book.snapshot().await;
        let states = self.plan(&current, scores)?;
        let next = book.publish(current.version, states).await?;
        self.last_rebalance = now;

        tracing::info!(
            "⚖️ Rebalanced {} source weights (v{} → v{})",
            next.len(),
            current.version,
            next.version
        );
        for state in &next.states {
            let before = current.weight(&state.source_id).unwrap_or(0.0);
            tracing::debug!("   {} {:.4} → {:.4}", state.source_id, before, state.weight);
        }

        Ok(Some(next))
    }
}
