use async_trait::async_trait;
use std::collections::HashMap;

use super::scoring::{combine, evidence_strength, BiasDamping, ScoreComponent};
use super::{Opinion, OpinionSource, SourceProfile, TimeHorizon};
use crate::core::EngineResult;
use crate::market::{AssetContext, Trend};

/// Growth optimist: adoption curves and platform potential matter most,
/// short-term price action barely registers.
pub struct InnovationAssessor {
    profile: SourceProfile,
    damping: BiasDamping,
    platform_scores: HashMap<String, f64>,
}

impl InnovationAssessor {
    pub fn new(damping: BiasDamping) -> Self {
        let profile = SourceProfile::new("innovation", "Innovation Assessor")
            .with_bias(85.0)
            .with_risk_tolerance(80.0)
            .with_time_horizon(TimeHorizon::Long)
            .with_focus_tags(&["disruptive-innovation", "exponential-growth", "platform-potential"])
            .with_signal_threshold(40.0);

        let platform_scores = HashMap::from([("BTC".to_string(), 50.0), ("ETH".to_string(), 60.0)]);

        Self {
            profile,
            damping,
            platform_scores,
        }
    }

    pub fn with_profile(mut self, profile: SourceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Overrides the platform potential credited to an asset.
    pub fn with_platform_score(mut self, asset: &str, score: f64) -> Self {
        self.platform_scores.insert(asset.to_uppercase(), score);
        self
    }

    fn evaluate_technical(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();
        match context.market_data.trend {
            Trend::StrongUptrend | Trend::Uptrend => {
                component.add(20.0, "Price momentum confirms the market is recognizing the opportunity")
            }
            Trend::StrongDowntrend | Trend::Downtrend => component.add(
                -10.0,
                "Short-term weakness is noise against a long-horizon thesis",
            ),
            Trend::Sideways => {}
        }
        component
    }

    fn evaluate_fundamentals(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();
        match context.market_data.fundamentals.adoption_growth_pct {
            Some(growth) if growth > 30.0 => component.add(
                40.0,
                format!("{:.0}% adoption growth is on an exponential curve", growth),
            ),
            Some(growth) if growth > 10.0 => component.add(
                20.0,
                format!("{:.0}% adoption growth shows a healthy network effect", growth),
            ),
            _ => {}
        }
        component
    }

    fn evaluate_innovation(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();

        if let Some(score) = self.platform_scores.get(&context.asset) {
            component.add(
                *score,
                format!("{} carries significant platform potential", context.asset),
            );
        }

        if let Some(sentiment) = context
            .market_data
            .sentiment
            .as_ref()
            .filter(|s| s.score > 0.5)
        {
            component.add(
                20.0,
                format!("Sentiment of {:.2} reflects growing recognition", sentiment.score),
            );
        }

        component
    }
}

#[async_trait]
impl OpinionSource for InnovationAssessor {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn evaluate(&self, context: &AssetContext) -> EngineResult<Opinion> {
        let technical = self.evaluate_technical(context);
        let fundamentals = self.evaluate_fundamentals(context);
        let innovation = self.evaluate_innovation(context);

        let (score, rationale) =
            combine(&[(&technical, 0.2), (&fundamentals, 0.3), (&innovation, 0.5)]);

        let strength = evidence_strength(context).score / 100.0;
        let adjusted = self.damping.apply(score, self.profile.bias, strength);
        let confidence = (0.5 + adjusted.abs() / 200.0).min(1.0);

        tracing::debug!(
            "🚀 {} scored {}: raw={:.1} adjusted={:.1}",
            self.profile.name,
            context.asset,
            score,
            adjusted
        );

        Ok(Opinion::new(&self.profile.id, &context.asset, adjusted, confidence, rationale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketData, Sentiment};
    use crate::sources::Recommendation;

    #[tokio::test]
    async fn test_bullish_prior_without_data() {
        let assessor = InnovationAssessor::new(BiasDamping::default());
        let opinion = assessor.evaluate(&AssetContext::new("DOT")).await.unwrap();

        // No sub-rule fires; bias 85 * 0.3 alone lands at 25.5.
        assert!((opinion.raw_score - 25.5).abs() < 1e-9);
        assert_eq!(opinion.recommendation, Recommendation::Buy);
        assert!((opinion.confidence - 0.6275).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_adoption_and_platform_stack_up() {
        let assessor = InnovationAssessor::new(BiasDamping::default());
        let mut market = MarketData {
            trend: Trend::Uptrend,
            sentiment: Some(Sentiment {
                score: 0.7,
                themes: vec![],
            }),
            ..Default::default()
        };
        market.fundamentals.adoption_growth_pct = Some(45.0);
        let context = AssetContext::new("ETH").with_market_data(market);

        let opinion = assessor.evaluate(&context).await.unwrap();

        // 20*0.2 + 40*0.3 + 80*0.5 = 56, plus 25.5 bias
        assert!((opinion.raw_score - 81.5).abs() < 1e-9);
        assert_eq!(opinion.recommendation, Recommendation::StrongBuy);
        assert_eq!(opinion.rationale.len(), 4);
    }

    #[tokio::test]
    async fn test_platform_score_override() {
        let assessor = InnovationAssessor::new(BiasDamping::default()).with_platform_score("sol", 40.0);
        let opinion = assessor.evaluate(&AssetContext::new("SOL")).await.unwrap();
        assert!((opinion.raw_score - 45.5).abs() < 1e-9);
    }
}
