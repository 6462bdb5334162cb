use anyhow::{Context, Result};
use std::sync::Arc;

use opinion_consensus_engine::consensus::{ConsensusEngine, Signal};
use opinion_consensus_engine::core::logging::init_logging;
use opinion_consensus_engine::core::{Config, ConsensusEvent, EventBus};
use opinion_consensus_engine::market::{AssetContext, MarketData, Sentiment, Trend};
use opinion_consensus_engine::sources::{BiasDamping, SourceKind};
use opinion_consensus_engine::tournament::{
    OutcomeProvider, ReportedOutcomes, SimulatedOutcomes, StaticFeed, TournamentScheduler,
};
use opinion_consensus_engine::trading::{
    DecisionPipeline, LeverageResolver, PaperGateway, VolatilityRiskAssessor,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;

    // Initialize logging
    init_logging(&config.monitoring.log_level);

    tracing::info!("🚀 Opinion Consensus Engine starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Simulation mode: {}", config.tournament.simulation_mode);

    let event_bus = Arc::new(EventBus::new(config.monitoring.event_bus_capacity));
    let engine = Arc::new(ConsensusEngine::from_config(&config).with_event_bus(event_bus.clone()));

    let damping = BiasDamping::from(&config.scoring);
    for kind in SourceKind::BUILTIN {
        if let Some(source) = kind.build(damping) {
            engine.register_source(kind, source).await?;
        }
    }
    tracing::info!("✅ {} opinion sources registered", engine.registry().len().await);

    // Leaderboard reporting
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConsensusEvent::LeaderboardPublished { cycle_id, entries, .. } => {
                    tracing::info!("🏆 Leaderboard after cycle {}", cycle_id);
                    for entry in entries {
                        tracing::info!(
                            "   #{} {:<22} weight={:.3} score={:+.4} win={:.0}% pnl={:+.2}",
                            entry.rank,
                            entry.name,
                            entry.weight,
                            entry.decayed_score,
                            entry.win_rate * 100.0,
                            entry.total_pnl
                        );
                    }
                }
                ConsensusEvent::SourceExcluded { source_id, asset, reason, .. } => {
                    tracing::warn!("⚠️ {} excluded on {}: {}", source_id, asset, reason);
                }
                ConsensusEvent::ConsensusComputed(result) if result.requires_review => {
                    tracing::warn!("👀 Review requested: {}", result.summary());
                }
                _ => {}
            }
        }
    });

    let contexts = demo_contexts();

    let outcomes: Arc<dyn OutcomeProvider> = if config.tournament.simulation_mode {
        Arc::new(SimulatedOutcomes)
    } else {
        // Fill reporters publish OutcomeReported on the bus.
        let reported = Arc::new(ReportedOutcomes::new());
        reported.spawn_ingest(&event_bus);
        tracing::info!("📬 Accepting reported outcomes from the event bus");
        reported
    };
    let scheduler = Arc::new(TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(contexts.clone())),
        outcomes,
    ));

    let mut pipeline = DecisionPipeline::new(
        engine.clone(),
        Arc::new(VolatilityRiskAssessor::default()),
        LeverageResolver::new(config.leverage.clone()),
        Arc::new(PaperGateway::new()),
    );
    pipeline.enable_trading();
    for context in contexts {
        let signal = Signal::new(context, 45.0, 0.6).with_position_size(500.0);
        let decision = pipeline.evaluate(signal).await?;
        tracing::info!("📋 {}", decision.consensus.summary());
    }

    scheduler.start().await?;

    // Keep running until interrupted
    let mut status = tokio::time::interval(tokio::time::Duration::from_secs(60));
    status.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = status.tick() => {
                let snapshot = engine.weights().snapshot().await;
                tracing::info!(
                    "Engine status: {} (weights v{}, {} cycles)",
                    scheduler.state(),
                    snapshot.version,
                    engine.metrics().get_cycles()
                );
            }
        }
    }

    scheduler.stop().await;
    engine.metrics().print_report();

    Ok(())
}

fn demo_contexts() -> Vec<AssetContext> {
    let mut btc = MarketData {
        price: 63_120.0,
        trend: Trend::Uptrend,
        historical_prices: vec![61_800.0, 62_450.0, 62_100.0, 62_900.0, 63_120.0],
        realized_return_pct: Some(1.8),
        sentiment: Some(Sentiment {
            score: 0.55,
            themes: vec!["ETF inflows".to_string()],
        }),
        ..Default::default()
    };
    btc.fundamentals.institutional_inflows_musd = Some(320.0);
    btc.fundamentals.new_institutional_entities = 4;
    btc.fundamentals.adoption_growth_pct = Some(18.0);

    let mut eth = MarketData {
        price: 3_322.0,
        trend: Trend::Downtrend,
        historical_prices: vec![3_450.0, 3_390.0, 3_410.0, 3_350.0, 3_322.0],
        realized_return_pct: Some(-2.4),
        sentiment: Some(Sentiment {
            score: -0.2,
            themes: vec!["SEC staking review".to_string()],
        }),
        ..Default::default()
    };
    eth.fundamentals.institutional_inflows_musd = Some(-85.0);
    eth.fundamentals.adoption_growth_pct = Some(35.0);
    eth.fundamentals.cash_flow_yield_pct = Some(3.1);

    vec![
        AssetContext::new("BTC").with_market_data(btc),
        AssetContext::new("ETH").with_market_data(eth),
    ]
}
