use async_trait::async_trait;

use super::scoring::{combine, evidence_strength, trend_score, BiasDamping, ScoreComponent};
use super::{Opinion, OpinionSource, SourceProfile, TimeHorizon};
use crate::core::EngineResult;
use crate::market::AssetContext;

const REGULATORY_TOPICS: [&str; 4] = ["regulation", "sec", "compliance", "lawsuit"];

/// Institutional pragmatist: regulatory exposure and institutional flows
/// dominate, technicals confirm.
pub struct RegulatoryAssessor {
    profile: SourceProfile,
    damping: BiasDamping,
    established_assets: Vec<String>,
}

impl RegulatoryAssessor {
    pub fn new(damping: BiasDamping) -> Self {
        let profile = SourceProfile::new("regulatory", "Regulatory Assessor")
            .with_bias(-20.0)
            .with_risk_tolerance(30.0)
            .with_time_horizon(TimeHorizon::Medium)
            .with_focus_tags(&["regulation", "institutional-adoption", "blockchain-technology"])
            .with_signal_threshold(70.0);

        Self {
            profile,
            damping,
            established_assets: vec!["BTC".to_string(), "ETH".to_string()],
        }
    }

    pub fn with_profile(mut self, profile: SourceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Assets treated as having settled regulatory status.
    pub fn with_established_assets(mut self, assets: &[&str]) -> Self {
        self.established_assets = assets.iter().map(|a| a.to_uppercase()).collect();
        self
    }

    fn evaluate_regulatory(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();

        if let Some(sentiment) = context
            .market_data
            .sentiment
            .as_ref()
            .filter(|s| !s.themes.is_empty())
        {
            let concerned = sentiment.themes.iter().any(|theme| {
                let theme = theme.to_lowercase();
                REGULATORY_TOPICS.iter().any(|topic| theme.contains(topic))
            });

            if concerned {
                component.add(-40.0, "Regulatory uncertainty poses significant risk for institutional exposure");
            } else {
                component.add(20.0, "Absence of immediate regulatory concerns provides a short-term opening");
            }
        }

        if self.established_assets.iter().any(|a| a == &context.asset) {
            component.add(
                10.0,
                format!("{} has more regulatory clarity than newer alternatives", context.asset),
            );
        }

        component
    }

    fn evaluate_institutional(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();
        let fundamentals = &context.market_data.fundamentals;

        match fundamentals.institutional_inflows_musd {
            Some(flows) if flows > 0.0 => component.add(
                30.0,
                format!("Institutional inflows of {:.0}M indicate growing professional acceptance", flows),
            ),
            Some(flows) if flows < 0.0 => component.add(
                -40.0,
                format!("Institutional outflows of {:.0}M raise concerns about professional sentiment", flows.abs()),
            ),
            _ => {}
        }

        if fundamentals.new_institutional_entities > 0 {
            component.add(
                20.0,
                format!(
                    "{} new institutional entities signal expanding acceptance",
                    fundamentals.new_institutional_entities
                ),
            );
        }

        component
    }
}

#[async_trait]
impl OpinionSource for RegulatoryAssessor {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn evaluate(&self, context: &AssetContext) -> EngineResult<Opinion> {
        let regulatory = self.evaluate_regulatory(context);
        let technical = trend_score(context.market_data.trend);
        let institutional = self.evaluate_institutional(context);

        let (score, rationale) =
            combine(&[(&regulatory, 0.4), (&technical, 0.2), (&institutional, 0.4)]);

        let strength = evidence_strength(context).score / 100.0;
        let adjusted = self.damping.apply(score, self.profile.bias, strength);
        let confidence = (0.4 + adjusted.abs() / 150.0).min(1.0);

        tracing::debug!(
            "🏛️ {} scored {}: raw={:.1} adjusted={:.1}",
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
    use crate::market::{MarketData, Sentiment, Trend};
    use crate::sources::Recommendation;

    fn bullish_market() -> MarketData {
        let mut market = MarketData {
            trend: Trend::StrongUptrend,
            sentiment: Some(Sentiment {
                score: 0.6,
                themes: vec!["ETF approval".to_string()],
            }),
            ..Default::default()
        };
        market.fundamentals.institutional_inflows_musd = Some(250.0);
        market.fundamentals.new_institutional_entities = 3;
        market
    }

    #[tokio::test]
    async fn test_institutional_inflows_drive_buy() {
        let assessor = RegulatoryAssessor::new(BiasDamping::default());
        let context = AssetContext::new("BTC").with_market_data(bullish_market());

        let opinion = assessor.evaluate(&context).await.unwrap();

        // regulatory 30*0.4 + technical 30*0.2 + institutional 50*0.4 = 38, bias -20 * 0.3 = -6
        assert!((opinion.raw_score - 32.0).abs() < 1e-9);
        assert_eq!(opinion.recommendation, Recommendation::Buy);
        assert_eq!(opinion.source_id, "regulatory");
    }

    #[tokio::test]
    async fn test_regulatory_themes_turn_bearish() {
        let assessor = RegulatoryAssessor::new(BiasDamping::default());
        let mut market = bullish_market();
        market.trend = Trend::StrongDowntrend;
        market.sentiment = Some(Sentiment {
            score: -0.4,
            themes: vec!["SEC lawsuit".to_string()],
        });
        market.fundamentals.institutional_inflows_musd = Some(-120.0);
        market.fundamentals.new_institutional_entities = 0;
        let context = AssetContext::new("SOL").with_market_data(market);

        let opinion = assessor.evaluate(&context).await.unwrap();

        // -40*0.4 + -40*0.2 + -40*0.4 = -40, bias -6
        assert!((opinion.raw_score - (-46.0)).abs() < 1e-9);
        assert_eq!(opinion.recommendation, Recommendation::Sell);
        assert!(opinion.rationale.iter().any(|r| r.contains("Regulatory uncertainty")));
    }
}
