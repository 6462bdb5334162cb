use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::leverage::{ConsensusSummary, LeverageDecision, LeverageResolver};
use super::risk_manager::{RiskAssessment, RiskAssessor, TradeParams};
use crate::consensus::{ConsensusEngine, ConsensusResult, Signal};
use crate::sources::Recommendation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionIntent {
    pub decision_id: Uuid,
    pub asset: String,
    pub recommendation: Recommendation,
    pub leverage: f64,
}

/// Order placement collaborator.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(&self, intent: ExecutionIntent) -> Result<()>;
}

/// Records intents instead of placing orders.
#[derive(Debug, Default)]
pub struct PaperGateway {
    submitted: RwLock<Vec<ExecutionIntent>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submitted(&self) -> Vec<ExecutionIntent> {
        self.submitted.read().await.clone()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit(&self, intent: ExecutionIntent) -> Result<()> {
        tracing::info!(
            "📝 PAPER {} {} @ {:.1}x",
            intent.recommendation,
            intent.asset,
            intent.leverage
        );
        self.submitted.write().await.push(intent);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub consensus: ConsensusResult,
    pub risk: RiskAssessment,
    pub leverage: LeverageDecision,
    /// `None` when nothing was submitted.
    pub intent: Option<ExecutionIntent>,
}

/// Consensus → risk assessment → leverage → execution.
pub struct DecisionPipeline {
    engine: Arc<ConsensusEngine>,
    risk_assessor: Arc<dyn RiskAssessor>,
    resolver: LeverageResolver,
    gateway: Arc<dyn ExecutionGateway>,
    equity: f64,
    enabled: bool,
}

impl DecisionPipeline {
    pub fn new(
        engine: Arc<ConsensusEngine>,
        risk_assessor: Arc<dyn RiskAssessor>,
        resolver: LeverageResolver,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> Self {
        Self {
            engine,
            risk_assessor,
            resolver,
            gateway,
            equity: 10_000.0,
            enabled: false, // Start disabled for safety
        }
    }

    /// Account equity position sizes are measured against.
    pub fn with_equity(mut self, equity: f64) -> Self {
        self.equity = equity;
        self
    }

    pub async fn evaluate(&self, signal: Signal) -> Result<Decision> {
        let trade = TradeParams {
            asset: signal.context.asset.clone(),
            size: signal.position_size,
            equity: self.equity,
        };
        let market = signal.context.market_data.clone();

        let consensus = self.engine.process_signal(signal).await;
        let risk = self
            .risk_assessor
            .assess_trade(&trade, &market, consensus.confidence);
        let leverage = self
            .resolver
            .calculate_optimal_leverage(&ConsensusSummary::from(&consensus), &risk);

        tracing::info!(
            "🎯 {} {} @ {:.1}x ({})",
            consensus.asset,
            consensus.recommendation,
            leverage.leverage,
            leverage.reason
        );

        let intent = if !consensus.recommendation.is_actionable() {
            tracing::debug!("⏸️  Neutral decision for {}, nothing to submit", consensus.asset);
            None
        } else if !self.enabled {
            tracing::debug!("⏸️  Execution disabled, {} not submitted", consensus.asset);
            None
        } else {
            let intent = ExecutionIntent {
                decision_id: consensus.decision_id,
                asset: consensus.asset.clone(),
                recommendation: consensus.recommendation,
                leverage: leverage.leverage,
            };
            self.gateway
                .submit(intent.clone())
                .await
                .with_context(|| format!("failed to submit decision {}", intent.decision_id))?;
            Some(intent)
        };

        Ok(Decision {
            consensus,
            risk,
            leverage,
            intent,
        })
    }

    pub fn enable_trading(&mut self) {
        self.enabled = true;
        tracing::warn!("⚠️  EXECUTION ENABLED - decisions will be submitted to the gateway");
    }

    pub fn disable_trading(&mut self) {
        self.enabled = false;
        tracing::info!("✅ Execution disabled - decisions are logged only");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
