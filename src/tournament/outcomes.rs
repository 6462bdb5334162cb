use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::core::{ConsensusEvent, EventBus};
use crate::market::AssetContext;
use crate::sources::{Opinion, Recommendation};

/// Source of the contexts evaluated each tournament cycle.
#[async_trait]
pub trait ContextFeed: Send + Sync {
    async fn contexts(&self) -> Result<Vec<AssetContext>>;
}

/// Fixed set of contexts, replayed every cycle.
pub struct StaticFeed {
    contexts: Vec<AssetContext>,
}

impl StaticFeed {
    pub fn new(contexts: Vec<AssetContext>) -> Self {
        Self { contexts }
    }
}

#[async_trait]
impl ContextFeed for StaticFeed {
    async fn contexts(&self) -> Result<Vec<AssetContext>> {
        Ok(self.contexts.clone())
    }
}

/// Turns a cycle's opinions into realized PnL per opinion.
#[cfg_attr(test, mockall::automock)]
pub trait OutcomeProvider: Send + Sync {
    /// `None` means the outcome is not known yet; nothing is recorded.
    fn outcome(&self, opinion: &Opinion, context: &AssetContext) -> Option<f64>;

    /// Called once per cycle after every outcome has been read.
    fn end_cycle(&self) {}
}

/// Deterministic paper outcome: `direction · confidence · realized_return_pct`.
/// Neutral opinions take no position and earn nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedOutcomes;

pub fn direction(recommendation: Recommendation) -> f64 {
    match recommendation {
        Recommendation::StrongBuy | Recommendation::Buy => 1.0,
        Recommendation::Neutral => 0.0,
        Recommendation::Sell | Recommendation::StrongSell => -1.0,
    }
}

impl OutcomeProvider for SimulatedOutcomes {
    fn outcome(&self, opinion: &Opinion, context: &AssetContext) -> Option<f64> {
        let realized = context.market_data.realized_return_pct?;
        Some(direction(opinion.recommendation) * opinion.confidence * realized)
    }
}

/// Outcomes reported from real fills, keyed by source and asset. Each report
/// is consumed by the next cycle that reads it.
#[derive(Debug, Default)]
pub struct ReportedOutcomes {
    pending: Mutex<HashMap<(String, String), f64>>,
}

impl ReportedOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to any PnL already pending for the same source and asset.
    pub fn report(&self, source_id: &str, asset: &str, pnl: f64) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending
                .entry((source_id.to_string(), asset.to_uppercase()))
                .or_insert(0.0) += pnl;
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Reports every `OutcomeReported` event published on the bus. The task
    /// subscribes before returning and runs until the bus closes.
    pub fn spawn_ingest(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let outcomes = self.clone();
        let mut events = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConsensusEvent::OutcomeReported {
                        source_id, asset, pnl, ..
                    }) => {
                        tracing::debug!("📬 Outcome for '{}' on {}: {:+.4}", source_id, asset, pnl);
                        outcomes.report(&source_id, &asset, pnl);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("⚠️ Outcome ingest fell behind, {} event(s) lost", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl OutcomeProvider for ReportedOutcomes {
    fn outcome(&self, opinion: &Opinion, _context: &AssetContext) -> Option<f64> {
        self.pending
            .lock()
            .ok()?
            .remove(&(opinion.source_id.clone(), opinion.asset.to_uppercase()))
    }

    fn end_cycle(&self) {
        if let Ok(pending) = self.pending.lock() {
            if !pending.is_empty() {
                tracing::debug!("📬 {} reported outcome(s) await a matching opinion", pending.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_return(realized: Option<f64>) -> AssetContext {
        let mut context = AssetContext::new("BTC");
        context.market_data.realized_return_pct = realized;
        context
    }

    #[test]
    fn test_simulated_outcome_follows_direction() {
        let context = context_with_return(Some(4.0));
        let buy = Opinion::new("a", "BTC", 50.0, 0.5, vec![]);
        let sell = Opinion::new("b", "BTC", -50.0, 0.5, vec![]);
        let hold = Opinion::new("c", "BTC", 0.0, 0.9, vec![]);

        assert_eq!(SimulatedOutcomes.outcome(&buy, &context), Some(2.0));
        assert_eq!(SimulatedOutcomes.outcome(&sell, &context), Some(-2.0));
        assert_eq!(SimulatedOutcomes.outcome(&hold, &context), Some(0.0));
        assert_eq!(
            SimulatedOutcomes.outcome(&buy, &context_with_return(None)),
            None
        );
    }

    #[test]
    fn test_reported_outcomes_are_consumed_once() {
        let outcomes = ReportedOutcomes::new();
        outcomes.report("a", "btc", 1.5);
        outcomes.report("a", "BTC", 0.5);

        let opinion = Opinion::new("a", "BTC", 30.0, 0.6, vec![]);
        let context = AssetContext::new("BTC");
        assert_eq!(outcomes.outcome(&opinion, &context), Some(2.0));
        assert_eq!(outcomes.outcome(&opinion, &context), None);
        assert_eq!(outcomes.pending(), 0);
    }

    #[test]
    fn test_reported_outcome_matches_any_asset_case() {
        let outcomes = ReportedOutcomes::new();
        outcomes.report("a", "ETH", 3.0);

        let mut opinion = Opinion::new("a", "ETH", 30.0, 0.6, vec![]);
        opinion.asset = "eth".to_string();
        let mut context = AssetContext::new("ETH");
        context.asset = "eth".to_string();

        assert_eq!(outcomes.outcome(&opinion, &context), Some(3.0));
    }

    #[tokio::test]
    async fn test_ingest_reports_bus_outcomes() {
        let bus = EventBus::new(16);
        let outcomes = Arc::new(ReportedOutcomes::new());
        let handle = outcomes.spawn_ingest(&bus);

        bus.publish(ConsensusEvent::OutcomeReported {
            source_id: "a".to_string(),
            asset: "btc".to_string(),
            pnl: 1.25,
            timestamp: chrono::Utc::now(),
        });

        for _ in 0..100 {
            if outcomes.pending() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(outcomes.pending(), 1);

        let opinion = Opinion::new("a", "BTC", 40.0, 0.7, vec![]);
        assert_eq!(outcomes.outcome(&opinion, &AssetContext::new("BTC")), Some(1.25));
        handle.abort();
    }

    #[test]
    fn test_static_feed_replays() {
        let feed = StaticFeed::new(vec![AssetContext::new("ETH")]);
        let first = tokio_test::block_on(feed.contexts()).unwrap();
        let second = tokio_test::block_on(feed.contexts()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second[0].asset, "ETH");
    }
}
