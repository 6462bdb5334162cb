//! Scoring helpers shared by every source variant.

use crate::core::ScoringConfig;
use crate::market::{AssetContext, Trend};

/// One weighted sub-rule result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreComponent {
    pub score: f64,
    pub rationale: Vec<String>,
}

impl ScoreComponent {
    pub fn add(&mut self, delta: f64, reason: impl Into<String>) {
        self.score += delta;
        self.rationale.push(reason.into());
    }
}

/// Weighted sum of sub-rule scores, rationale kept in component order.
pub fn combine(components: &[(&ScoreComponent, f64)]) -> (f64, Vec<String>) {
    let score = components.iter().map(|(c, w)| c.score * w).sum();
    let rationale = components
        .iter()
        .flat_map(|(c, _)| c.rationale.iter().cloned())
        .collect();
    (score, rationale)
}

/// Damps a source's personal bias by the strength of the evidence in front of it.
/// Strong evidence can override the bias but never silences it completely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasDamping {
    pub ceiling: f64,
    pub slope: f64,
    pub floor: f64,
}

impl Default for BiasDamping {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for BiasDamping {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            ceiling: config.bias_ceiling,
            slope: config.bias_evidence_slope,
            floor: config.bias_floor,
        }
    }
}

impl BiasDamping {
    /// `max(floor, ceiling - e * slope)` for evidence strength `e` in [0, 1].
    pub fn bias_weight(&self, evidence: f64) -> f64 {
        let e = evidence.clamp(0.0, 1.0);
        (self.ceiling - e * self.slope).max(self.floor)
    }

    pub fn apply(&self, raw_score: f64, bias: f64, evidence: f64) -> f64 {
        (raw_score + bias * self.bias_weight(evidence)).clamp(-100.0, 100.0)
    }
}

/// Evidence strength on a 0-100 scale. Divide by 100 for damping.
pub fn evidence_strength(context: &AssetContext) -> ScoreComponent {
    let mut component = ScoreComponent::default();
    let research = &context.research;

    if research.source_count >= 3 {
        component.add(20.0, "Multiple independent research sources provide supporting evidence");
    }
    if research.peer_reviewed {
        component.add(15.0, "Peer-reviewed analysis adds credibility to the thesis");
    }
    if let Some(years) = research.backtest_years.filter(|y| *y >= 5) {
        component.add(
            25.0,
            format!("{}-year backtest shows consistent performance patterns", years),
        );
    }
    if research.statistical_significance.unwrap_or(0.0) > 0.95 {
        component.add(20.0, "Statistical significance rules out coincidence");
    }
    if let Some(adoption) = context
        .market_data
        .fundamentals
        .institutional_adoption_pct
        .filter(|pct| *pct > 30.0)
    {
        component.add(
            20.0,
            format!(
                "{:.0}% institutional adoption suggests legitimacy beyond speculation",
                adoption
            ),
        );
    }

    component.score = component.score.min(100.0);
    component
}

/// Conservative reading of the prevailing trend.
pub fn trend_score(trend: Trend) -> ScoreComponent {
    let mut component = ScoreComponent::default();
    match trend {
        Trend::StrongUptrend => component.add(30.0, "Strong uptrend suggests sustainable price action"),
        Trend::Uptrend => component.add(15.0, "Positive trend, continuation still needs monitoring"),
        Trend::Sideways => {}
        Trend::Downtrend => component.add(-20.0, "Negative trend suggests waiting for stabilization"),
        Trend::StrongDowntrend => {
            component.add(-40.0, "Significant downtrend pushes risk beyond acceptable levels")
        }
    }
    component
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::ResearchArtifacts;

    #[test]
    fn test_bias_weight_bounds() {
        let damping = BiasDamping::default();
        assert!((damping.bias_weight(0.0) - 0.3).abs() < 1e-12);
        assert!((damping.bias_weight(1.0) - 0.05).abs() < 1e-12);
        // Floor holds even when the slope would go negative.
        let steep = BiasDamping { slope: 1.0, ..damping };
        assert_eq!(steep.bias_weight(1.0), 0.05);
    }

    #[test]
    fn test_bias_adjustment_is_clamped() {
        let damping = BiasDamping::default();
        assert_eq!(damping.apply(95.0, 100.0, 0.0), 100.0);
        assert_eq!(damping.apply(-95.0, -100.0, 0.0), -100.0);
        assert!((damping.apply(10.0, -85.0, 0.0) - (10.0 - 25.5)).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_strength_caps_at_100() {
        let mut context = AssetContext::new("ETH").with_research(ResearchArtifacts {
            source_count: 5,
            peer_reviewed: true,
            backtest_years: Some(8),
            statistical_significance: Some(0.99),
        });
        context.market_data.fundamentals.institutional_adoption_pct = Some(45.0);

        let evidence = evidence_strength(&context);
        assert_eq!(evidence.score, 100.0);
        assert_eq!(evidence.rationale.len(), 5);
    }

    #[test]
    fn test_combine_weights_components() {
        let mut a = ScoreComponent::default();
        a.add(50.0, "a");
        let mut b = ScoreComponent::default();
        b.add(-20.0, "b");

        let (score, rationale) = combine(&[(&a, 0.6), (&b, 0.4)]);
        assert!((score - 22.0).abs() < 1e-12);
        assert_eq!(rationale, vec!["a".to_string(), "b".to_string()]);
    }
}
