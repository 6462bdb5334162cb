use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::outcomes::{ContextFeed, OutcomeProvider};
use super::performance::PerformanceTracker;
use super::weights::WeightRebalancer;
use crate::consensus::ConsensusEngine;
use crate::core::{ConsensusEvent, EngineError, EngineResult, TournamentConfig};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub source_id: String,
    pub name: String,
    pub weight: f64,
    pub decayed_score: f64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub cycles: usize,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub contexts: usize,
    pub opinions: usize,
    pub excluded: usize,
    pub recorded: usize,
    /// Version of the snapshot published by this cycle's rebalance.
    pub rebalanced_to: Option<u64>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

struct CycleState {
    cycle_id: u64,
    tracker: PerformanceTracker,
    rebalancer: WeightRebalancer,
    /// Join version of every source with tracked history.
    tracked: HashMap<String, u64>,
}

impl CycleState {
    /// Forgets the history of sources that left the book, or left and came
    /// back under the same id.
    fn prune(&mut self, memberships: &HashMap<String, u64>) {
        let stale: Vec<String> = self
            .tracked
            .iter()
            .filter(|(id, joined)| memberships.get(*id) != Some(*joined))
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            tracing::info!("🧹 Dropping performance history of '{}'", id);
            self.tracker.forget(&id);
            self.tracked.remove(&id);
        }
    }
}

/// Drives tournament cycles: collect opinions, score their outcomes, update
/// performance, rebalance weights, publish the leaderboard.
pub struct TournamentScheduler {
    config: TournamentConfig,
    engine: Arc<ConsensusEngine>,
    feed: Arc<dyn ContextFeed>,
    outcomes: Arc<dyn OutcomeProvider>,
    cycle: Mutex<CycleState>,
    state: watch::Sender<SchedulerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TournamentScheduler {
    pub fn new(
        config: TournamentConfig,
        engine: Arc<ConsensusEngine>,
        feed: Arc<dyn ContextFeed>,
        outcomes: Arc<dyn OutcomeProvider>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        let cycle = CycleState {
            cycle_id: 0,
            tracker: PerformanceTracker::new(config.performance_decay_factor),
            rebalancer: WeightRebalancer::new(config.clone()),
            tracked: HashMap::new(),
        };

        Self {
            config,
            engine,
            feed,
            outcomes,
            cycle: Mutex::new(cycle),
            state,
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.state() != SchedulerState::Idle {
            return Err(EngineError::conflict(format!(
                "scheduler cannot start from state {}",
                self.state()
            )));
        }
        self.transition(SchedulerState::Running);

        let period = self.config.rebalance_period().max(Duration::from_millis(1));
        tracing::info!("🏁 Tournament started, one cycle every {:?}", period);

        let scheduler = self.clone();
        let mut state_rx = self.state.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = state_rx.changed() => {
                        if changed.is_err() || *state_rx.borrow() == SchedulerState::Stopped {
                            break;
                        }
                        continue;
                    }
                }

                if scheduler.state() == SchedulerState::Stopped {
                    break;
                }

                // Runs to completion; stop is only observed between cycles.
                match scheduler.run_cycle().await {
                    Ok(report) => tracing::info!(
                        "✅ Cycle {} done: {} opinions, {} excluded, rebalanced: {}",
                        report.cycle_id,
                        report.opinions,
                        report.excluded,
                        report.rebalanced_to.is_some()
                    ),
                    Err(e) => tracing::error!("❌ Tournament cycle failed: {}", e),
                }
            }

            tracing::info!("🛑 Tournament loop exited");
        });

        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Moves to `Stopped` and waits for an in-flight cycle to finish.
    /// No further cycles fire afterwards.
    pub async fn stop(&self) {
        if self.state() == SchedulerState::Stopped {
            return;
        }
        self.transition(SchedulerState::Stopped);

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("❌ Tournament task ended abnormally: {}", e);
            }
        }
        tracing::info!("🛑 Tournament stopped");
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!("Scheduler {} → {}", previous, next);
        if let Some(bus) = self.engine.event_bus() {
            bus.publish(ConsensusEvent::SchedulerStateChanged {
                state: next,
                timestamp: Utc::now(),
            });
        }
    }

    /// One full tournament cycle. Cycles never overlap.
    pub async fn run_cycle(&self) -> EngineResult<CycleReport> {
        let mut cycle = self.cycle.lock().await;
        if self.state() == SchedulerState::Stopped {
            return Err(EngineError::conflict("scheduler is stopped"));
        }

        cycle.prune(&self.engine.weights().memberships().await);
        cycle.cycle_id += 1;
        let cycle_id = cycle.cycle_id;
        let metrics = self.engine.metrics();

        let contexts = match self.feed.contexts().await {
            Ok(contexts) => contexts,
            Err(e) => {
                tracing::warn!("⚠️ Context feed unavailable for cycle {}: {:#}", cycle_id, e);
                Vec::new()
            }
        };

        let mut report = CycleReport {
            cycle_id,
            contexts: contexts.len(),
            opinions: 0,
            excluded: 0,
            recorded: 0,
            rebalanced_to: None,
            leaderboard: Vec::new(),
        };

        // Summed over every asset the source spoke on this cycle.
        let mut pnl_by_source: BTreeMap<String, f64> = BTreeMap::new();

        for context in contexts {
            let context = Arc::new(context);
            let collection = self
                .engine
                .registry()
                .collect(context.clone(), self.engine.source_timeout())
                .await;

            report.opinions += collection.opinions.len();
            report.excluded += collection.failures.len();

            if let Some(bus) = self.engine.event_bus() {
                for failure in &collection.failures {
                    bus.publish(ConsensusEvent::SourceExcluded {
                        source_id: failure.source_id.clone(),
                        asset: context.asset.clone(),
                        reason: failure.error.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }

            for opinion in &collection.opinions {
                if let Some(pnl) = self.outcomes.outcome(opinion, &context) {
                    *pnl_by_source.entry(opinion.source_id.clone()).or_insert(0.0) += pnl;
                }
            }
        }
        self.outcomes.end_cycle();

        // Sources removed while the cycle ran are not recorded.
        let memberships = self.engine.weights().memberships().await;
        for (source_id, pnl) in &pnl_by_source {
            let Some(joined) = memberships.get(source_id) else {
                continue;
            };
            cycle.tracker.record_cycle(source_id, cycle_id, *pnl);
            cycle.tracked.insert(source_id.clone(), *joined);
            report.recorded += 1;
        }

        let scores = cycle.tracker.decayed_scores();
        match cycle.rebalancer.rebalance_weights(self.engine.weights(), &scores).await {
            Ok(Some(snapshot)) => {
                metrics.increment_rebalances();
                report.rebalanced_to = Some(snapshot.version);
                if let Some(bus) = self.engine.event_bus() {
                    bus.publish(ConsensusEvent::WeightsRebalanced(snapshot.as_ref().clone()));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Rebalance skipped in cycle {}: {}", cycle_id, e),
        }

        report.leaderboard = self.build_leaderboard(&cycle.tracker).await;
        if let Some(bus) = self.engine.event_bus() {
            bus.publish(ConsensusEvent::LeaderboardPublished {
                cycle_id,
                entries: report.leaderboard.clone(),
                timestamp: Utc::now(),
            });
        }

        metrics.increment_cycles();
        Ok(report)
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let cycle = self.cycle.lock().await;
        self.build_leaderboard(&cycle.tracker).await
    }

    /// Decayed score descending, source id ascending on ties.
    async fn build_leaderboard(&self, tracker: &PerformanceTracker) -> Vec<LeaderboardEntry> {
        let snapshot = self.engine.weights().snapshot().await;
        let registry = self.engine.registry();

        let mut entries = Vec::with_capacity(snapshot.len());
        for state in &snapshot.states {
            let name = registry
                .profile(&state.source_id)
                .await
                .map(|p| p.name)
                .unwrap_or_else(|| state.source_id.clone());

            entries.push(LeaderboardEntry {
                rank: 0,
                source_id: state.source_id.clone(),
                name,
                weight: state.weight,
                decayed_score: tracker.decayed_score(&state.source_id),
                win_rate: tracker.win_rate(&state.source_id),
                total_pnl: tracker.total_pnl(&state.source_id),
                cycles: tracker.cycles(&state.source_id),
            });
        }

        entries.sort_by(|a, b| {
            b.decayed_score
                .total_cmp(&a.decayed_score)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, EventBus};
    use crate::market::AssetContext;
    use crate::sources::registry::tests::ScriptedSource;
    use crate::sources::SourceKind;
    use crate::tournament::outcomes::{MockOutcomeProvider, SimulatedOutcomes, StaticFeed};

    fn config() -> Config {
        let mut config = Config::default();
        config.tournament.rebalance_period_secs = 0;
        config
    }

    async fn engine(config: &Config) -> Arc<ConsensusEngine> {
        let engine = ConsensusEngine::from_config(config).with_event_bus(Arc::new(EventBus::new(64)));
        for (id, score) in [("bull", 60.0), ("bear", -60.0), ("flat", 0.0)] {
            engine
                .register_source(SourceKind::External, ScriptedSource::scoring(id, score, 1.0))
                .await
                .unwrap();
        }
        Arc::new(engine)
    }

    fn rising_feed() -> Arc<dyn ContextFeed> {
        let mut context = AssetContext::new("BTC");
        context.market_data.realized_return_pct = Some(2.0);
        Arc::new(StaticFeed::new(vec![context]))
    }

    #[tokio::test]
    async fn test_cycle_rewards_correct_direction() {
        let config = config();
        let engine = engine(&config).await;
        let before = engine.weights().snapshot().await;
        let scheduler = TournamentScheduler::new(
            config.tournament.clone(),
            engine.clone(),
            rising_feed(),
            Arc::new(SimulatedOutcomes),
        );

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(report.cycle_id, 1);
        assert_eq!(report.opinions, 3);
        assert_eq!(report.recorded, 3);
        assert!(report.rebalanced_to.is_some());

        let after = engine.weights().snapshot().await;
        assert!(after.weight("bull").unwrap() > before.weight("bull").unwrap());
        assert!(after.weight("bear").unwrap() < before.weight("bear").unwrap());
        assert!((after.total() - 1.0).abs() < 1e-9);

        let board = &report.leaderboard;
        assert_eq!(board[0].source_id, "bull");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].win_rate, 1.0);
        assert_eq!(board[1].source_id, "flat");
        assert_eq!(board[2].source_id, "bear");
    }

    #[tokio::test]
    async fn test_unknown_outcomes_record_nothing() {
        let config = config();
        let engine = engine(&config).await;
        let mut outcomes = MockOutcomeProvider::new();
        outcomes.expect_outcome().times(3).returning(|_, _| None);
        outcomes.expect_end_cycle().times(1).return_const(());

        let scheduler = TournamentScheduler::new(
            config.tournament.clone(),
            engine,
            rising_feed(),
            Arc::new(outcomes),
        );

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recorded, 0);
        // Ties on a zero score fall back to id order.
        let ids: Vec<_> = report.leaderboard.iter().map(|e| e.source_id.as_str()).collect();
        assert_eq!(ids, vec!["bear", "bull", "flat"]);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let mut config = config();
        config.tournament.rebalance_period_secs = 3600;
        let engine = engine(&config).await;
        let scheduler = Arc::new(TournamentScheduler::new(
            config.tournament.clone(),
            engine.clone(),
            rising_feed(),
            Arc::new(SimulatedOutcomes),
        ));

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(scheduler.start().await.is_err());

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(matches!(scheduler.run_cycle().await, Err(EngineError::Conflict(_))));
        assert!(matches!(scheduler.start().await, Err(EngineError::Conflict(_))));
        assert_eq!(engine.metrics().get_cycles(), 0);
    }

    #[tokio::test]
    async fn test_rejoined_source_starts_with_a_clean_record() {
        let config = config();
        let engine = engine(&config).await;
        let scheduler = TournamentScheduler::new(
            config.tournament.clone(),
            engine.clone(),
            rising_feed(),
            Arc::new(SimulatedOutcomes),
        );

        scheduler.run_cycle().await.unwrap();
        scheduler.run_cycle().await.unwrap();
        let board = scheduler.leaderboard().await;
        let bear = board.iter().find(|e| e.source_id == "bear").unwrap();
        assert_eq!(bear.cycles, 2);

        engine.remove_source("bear").await.unwrap();
        engine
            .register_source(SourceKind::External, ScriptedSource::scoring("bear", -60.0, 1.0))
            .await
            .unwrap();

        let report = scheduler.run_cycle().await.unwrap();
        let bear = report.leaderboard.iter().find(|e| e.source_id == "bear").unwrap();
        let bull = report.leaderboard.iter().find(|e| e.source_id == "bull").unwrap();
        assert_eq!(bear.cycles, 1);
        assert_eq!(bear.win_rate, 0.0);
        assert!((bear.total_pnl - (-2.0)).abs() < 1e-12);
        assert_eq!(bull.cycles, 3);
    }
}
