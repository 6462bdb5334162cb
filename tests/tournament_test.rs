use opinion_consensus_engine::consensus::ConsensusEngine;
use chrono::Utc;
use opinion_consensus_engine::core::{Config, ConsensusEvent, EventBus};
use opinion_consensus_engine::market::{AssetContext, MarketData, Trend};
use opinion_consensus_engine::sources::{BiasDamping, SourceKind};
use opinion_consensus_engine::tournament::{
    ReportedOutcomes, SchedulerState, SimulatedOutcomes, StaticFeed, TournamentScheduler,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config(period_secs: u64) -> Config {
    let mut config = Config::default();
    config.tournament.rebalance_period_secs = period_secs;
    config.tournament.source_timeout_ms = 500;
    config
}

async fn builtin_engine(config: &Config, bus: Arc<EventBus>) -> Arc<ConsensusEngine> {
    let engine = ConsensusEngine::from_config(config).with_event_bus(bus);
    let damping = BiasDamping::from(&config.scoring);
    for kind in SourceKind::BUILTIN {
        engine
            .register_source(kind, kind.build(damping).unwrap())
            .await
            .unwrap();
    }
    Arc::new(engine)
}

fn falling_market() -> AssetContext {
    let mut market = MarketData {
        trend: Trend::StrongDowntrend,
        realized_return_pct: Some(-3.0),
        ..Default::default()
    };
    market.fundamentals.institutional_inflows_musd = Some(-150.0);
    AssetContext::new("BTC").with_market_data(market)
}

#[tokio::test]
async fn repeated_cycles_shift_weight_towards_the_right_sources() {
    let config = test_config(0);
    let bus = Arc::new(EventBus::new(256));
    let mut events = bus.subscribe();
    let engine = builtin_engine(&config, bus).await;

    let scheduler = TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(vec![falling_market()])),
        Arc::new(SimulatedOutcomes),
    );

    let before = engine.weights().snapshot().await;
    let mut last = None;
    for _ in 0..5 {
        last = Some(scheduler.run_cycle().await.unwrap());
    }
    let report = last.unwrap();
    let after = engine.weights().snapshot().await;

    assert_eq!(report.cycle_id, 5);
    assert_eq!(after.version, before.version + 5);
    assert!((after.total() - 1.0).abs() < 1e-9);

    // Every built-in starts with an equal share.
    for state in &before.states {
        assert!((state.weight - 1.0 / 3.0).abs() < 1e-12);
    }

    // Value and regulatory sell into the falling market and split what
    // innovation, buying it, loses at the full delta every cycle.
    let delta = config.tournament.max_weight_delta;
    let value = after.weight("value").unwrap();
    let regulatory = after.weight("regulatory").unwrap();
    let innovation = after.weight("innovation").unwrap();
    assert!((innovation - (1.0 / 3.0 - 5.0 * delta)).abs() < 1e-9);
    assert!((value - regulatory).abs() < 1e-9);
    assert!(value > before.weight("value").unwrap());
    assert!(innovation >= config.tournament.min_weight);

    let ranking: Vec<_> = report.leaderboard.iter().map(|e| e.source_id.as_str()).collect();
    assert_eq!(ranking, vec!["regulatory", "value", "innovation"]);
    assert_eq!(report.leaderboard[0].cycles, 5);
    assert_eq!(report.leaderboard[2].win_rate, 0.0);
    assert_eq!(engine.metrics().get_cycles(), 5);

    let mut leaderboards = 0;
    let mut rebalances = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ConsensusEvent::LeaderboardPublished { .. } => leaderboards += 1,
            ConsensusEvent::WeightsRebalanced(_) => rebalances += 1,
            _ => {}
        }
    }
    assert_eq!(leaderboards, 5);
    assert_eq!(rebalances, 5);
}

#[tokio::test]
async fn reported_outcomes_drive_the_leaderboard() {
    let config = test_config(0);
    let engine = builtin_engine(&config, Arc::new(EventBus::default())).await;
    let outcomes = Arc::new(ReportedOutcomes::new());

    let scheduler = TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(vec![AssetContext::new("ETH")])),
        outcomes.clone(),
    );

    outcomes.report("regulatory", "ETH", 4.0);
    outcomes.report("value", "ETH", -1.0);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.recorded, 2);
    assert_eq!(report.leaderboard[0].source_id, "regulatory");
    assert_eq!(report.leaderboard.last().unwrap().source_id, "value");
    assert_eq!(outcomes.pending(), 0);

    // Reports are consumed by the cycle that reads them.
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.recorded, 0);
}

#[tokio::test]
async fn outcomes_reported_on_the_bus_reach_the_tournament() {
    let config = test_config(0);
    let bus = Arc::new(EventBus::new(64));
    let engine = builtin_engine(&config, bus.clone()).await;
    let outcomes = Arc::new(ReportedOutcomes::new());
    let ingest = outcomes.spawn_ingest(&bus);

    let scheduler = TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(vec![AssetContext::new("BTC")])),
        outcomes.clone(),
    );

    bus.publish(ConsensusEvent::OutcomeReported {
        source_id: "innovation".to_string(),
        asset: "BTC".to_string(),
        pnl: 2.5,
        timestamp: Utc::now(),
    });
    for _ in 0..100 {
        if outcomes.pending() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.recorded, 1);
    assert_eq!(report.leaderboard[0].source_id, "innovation");
    assert!((report.leaderboard[0].total_pnl - 2.5).abs() < 1e-12);
    assert!(report.rebalanced_to.is_some());

    let weights = engine.weights().snapshot().await;
    assert!(weights.weight("innovation").unwrap() > 1.0 / 3.0);
    ingest.abort();
}

#[tokio::test]
async fn rebalance_gate_holds_between_periods() {
    let config = test_config(3600);
    let engine = builtin_engine(&config, Arc::new(EventBus::default())).await;
    let scheduler = TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(vec![falling_market()])),
        Arc::new(SimulatedOutcomes),
    );

    let before = engine.weights().snapshot().await;
    let report = scheduler.run_cycle().await.unwrap();

    assert!(report.rebalanced_to.is_none());
    assert_eq!(report.recorded, 3);
    assert_eq!(engine.weights().snapshot().await.version, before.version);
}

#[tokio::test]
async fn stopped_scheduler_fires_no_further_cycles() {
    let config = test_config(1);
    let engine = builtin_engine(&config, Arc::new(EventBus::default())).await;
    let scheduler = Arc::new(TournamentScheduler::new(
        config.tournament.clone(),
        engine.clone(),
        Arc::new(StaticFeed::new(vec![falling_market()])),
        Arc::new(SimulatedOutcomes),
    ));

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await;

    let cycles = engine.metrics().get_cycles();
    assert!(cycles >= 1);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.metrics().get_cycles(), cycles);
}
