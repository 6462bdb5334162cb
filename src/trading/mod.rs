pub mod leverage;
pub mod orchestrator;
pub mod risk_manager;

pub use leverage::{ConsensusSummary, LeverageDecision, LeverageResolver};
pub use orchestrator::{Decision, DecisionPipeline, ExecutionGateway, ExecutionIntent, PaperGateway};
pub use risk_manager::{RiskAssessment, RiskAssessor, RiskConfig, RiskLevel, TradeParams, VolatilityRiskAssessor};
