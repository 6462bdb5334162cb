use serde::{Deserialize, Serialize};

use super::risk_manager::RiskAssessment;
use crate::consensus::ConsensusResult;
use crate::core::LeverageConfig;

const MIN_RESPONDENTS: usize = 2;

/// The parts of a consensus decision leverage depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusSummary {
    pub has_consensus: bool,
    pub count: usize,
    pub confidence: f64,
}

impl From<&ConsensusResult> for ConsensusSummary {
    fn from(result: &ConsensusResult) -> Self {
        Self {
            has_consensus: result.has_consensus,
            count: result.respondent_count,
            confidence: result.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeverageDecision {
    pub leverage: f64,
    pub reason: String,
}

/// Stateless: identical inputs always give the identical decision.
#[derive(Debug, Clone)]
pub struct LeverageResolver {
    config: LeverageConfig,
}

impl LeverageResolver {
    pub fn new(config: LeverageConfig) -> Self {
        Self { config }
    }

    pub fn calculate_optimal_leverage(
        &self,
        consensus: &ConsensusSummary,
        risk: &RiskAssessment,
    ) -> LeverageDecision {
        if !consensus.has_consensus || consensus.count < MIN_RESPONDENTS {
            return LeverageDecision {
                leverage: self.config.default_leverage,
                reason: "insufficient consensus".to_string(),
            };
        }

        let leverage = risk
            .recommended_leverage
            .clamp(self.config.min_leverage, self.config.max_leverage);

        let reason = if leverage != risk.recommended_leverage {
            format!(
                "{:.1}x recommended at {} risk, clamped to {:.1}x",
                risk.recommended_leverage, risk.risk_level, leverage
            )
        } else {
            format!(
                "{:.1}x at {} risk, consensus confidence {:.2}",
                leverage, risk.risk_level, consensus.confidence
            )
        };

        LeverageDecision { leverage, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::risk_manager::RiskLevel;

    fn assessment(recommended_leverage: f64) -> RiskAssessment {
        RiskAssessment {
            recommended_leverage,
            total_risk: 0.4,
            risk_level: RiskLevel::Medium,
        }
    }

    fn agreed(count: usize) -> ConsensusSummary {
        ConsensusSummary {
            has_consensus: true,
            count,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_recommendation_is_clamped_to_max() {
        let resolver = LeverageResolver::new(LeverageConfig::default());
        let decision = resolver.calculate_optimal_leverage(&agreed(3), &assessment(15.0));
        assert_eq!(decision.leverage, 10.0);
        assert!(decision.reason.contains("clamped"));
    }

    #[test]
    fn test_recommendation_is_clamped_to_min() {
        let resolver = LeverageResolver::new(LeverageConfig::default());
        let decision = resolver.calculate_optimal_leverage(&agreed(3), &assessment(0.5));
        assert_eq!(decision.leverage, 1.0);
    }

    #[test]
    fn test_without_consensus_uses_default() {
        let resolver = LeverageResolver::new(LeverageConfig {
            default_leverage: 2.0,
            ..Default::default()
        });

        let none = ConsensusSummary {
            has_consensus: false,
            ..agreed(4)
        };
        let decision = resolver.calculate_optimal_leverage(&none, &assessment(8.0));
        assert_eq!(decision.leverage, 2.0);
        assert_eq!(decision.reason, "insufficient consensus");

        let lonely = resolver.calculate_optimal_leverage(&agreed(1), &assessment(8.0));
        assert_eq!(lonely.leverage, 2.0);
    }

    #[test]
    fn test_is_deterministic() {
        let resolver = LeverageResolver::new(LeverageConfig::default());
        let a = resolver.calculate_optimal_leverage(&agreed(2), &assessment(4.5));
        let b = resolver.calculate_optimal_leverage(&agreed(2), &assessment(4.5));
        assert_eq!(a, b);
        assert_eq!(a.leverage, 4.5);
    }
}
