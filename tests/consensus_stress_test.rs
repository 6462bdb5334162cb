use async_trait::async_trait;
use futures::future::join_all;
use opinion_consensus_engine::consensus::{ConsensusEngine, Signal};
use opinion_consensus_engine::core::{Config, EngineResult};
use opinion_consensus_engine::market::AssetContext;
use opinion_consensus_engine::sources::{Opinion, OpinionSource, SourceKind, SourceProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct JitterSource {
    profile: SourceProfile,
    score: f64,
    delay: Duration,
}

#[async_trait]
impl OpinionSource for JitterSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn evaluate(&self, context: &AssetContext) -> EngineResult<Opinion> {
        tokio::time::sleep(self.delay).await;
        Ok(Opinion::new(&self.profile.id, &context.asset, self.score, 0.7, vec![]))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Run with: cargo test --release -- --ignored --nocapture
async fn stress_test_concurrent_signals_over_large_pool() {
    println!("
╔══════════════════════════════════════════════════════════════════════╗
║        CONSENSUS STRESS TEST - 16 SOURCES x 1,000 SIGNALS           ║
╚══════════════════════════════════════════════════════════════════════╝
");

    let mut config = Config::default();
    config.tournament.min_weight = 0.01;
    config.tournament.source_timeout_ms = 250;
    let engine = Arc::new(ConsensusEngine::from_config(&config));

    for i in 0..16u64 {
        let source = JitterSource {
            profile: SourceProfile::new(format!("source-{:02}", i), format!("Source {}", i)),
            score: if i % 4 == 0 { -30.0 } else { 55.0 },
            // Every eighth source overruns the budget.
            delay: Duration::from_millis(if i % 8 == 7 { 1_000 } else { i % 5 }),
        };
        engine
            .register_source(SourceKind::External, Arc::new(source))
            .await
            .unwrap();
    }
    println!("✅ 16 sources registered");

    let signal_count = 1000;
    let start_time = Instant::now();

    let tasks = (0..signal_count).map(|i| {
        let engine = engine.clone();
        async move {
            let started = Instant::now();
            let asset = if i % 2 == 0 { "BTC" } else { "ETH" };
            let result = engine
                .process_signal(Signal::new(AssetContext::new(asset), 40.0, 0.5))
                .await;
            (result, started.elapsed())
        }
    });
    let results = join_all(tasks).await;
    let total_duration = start_time.elapsed();

    let mut latencies: Vec<Duration> = results.iter().map(|(_, l)| *l).collect();
    latencies.sort();
    let p50 = latencies[latencies.len() / 2].as_millis();
    let p95 = latencies[(latencies.len() as f64 * 0.95) as usize].as_millis();

    println!("\n📊 Results:");
    println!("   • Signals:        {}", signal_count);
    println!("   • Duration:       {:.2?}", total_duration);
    println!("   • p50 latency:    {} ms", p50);
    println!("   • p95 latency:    {} ms", p95);
    println!("   • Excluded:       {}", engine.metrics().get_excluded());

    for (result, _) in &results {
        assert_eq!(result.respondent_count, 14);
        assert!(result.has_consensus);
        assert_eq!(result.exclusions().count(), 2);
    }
    assert_eq!(engine.metrics().get_timeouts(), 2 * signal_count as u64);
}
