use async_trait::async_trait;

use super::scoring::{combine, evidence_strength, BiasDamping, ScoreComponent};
use super::{Opinion, OpinionSource, SourceProfile, TimeHorizon};
use crate::core::EngineResult;
use crate::market::{AssetContext, Trend};

/// Intrinsic-value skeptic: productive cash flow and low risk first,
/// with a strong bearish prior that only solid evidence can outweigh.
pub struct ValueAssessor {
    profile: SourceProfile,
    damping: BiasDamping,
}

impl ValueAssessor {
    pub fn new(damping: BiasDamping) -> Self {
        let profile = SourceProfile::new("value", "Value Assessor")
            .with_bias(-85.0)
            .with_risk_tolerance(20.0)
            .with_time_horizon(TimeHorizon::VeryLong)
            .with_focus_tags(&["intrinsic-value", "cash-flow", "moats", "productive-assets"])
            .with_signal_threshold(85.0);

        Self { profile, damping }
    }

    pub fn with_profile(mut self, profile: SourceProfile) -> Self {
        self.profile = profile;
        self
    }

    fn evaluate_value(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();
        let market = &context.market_data;

        match market.fundamentals.cash_flow_yield_pct {
            Some(y) if y >= 5.0 => {
                component.add(60.0, format!("Cash flow yield of {:.1}% supports intrinsic value", y))
            }
            Some(y) if y >= 2.0 => {
                component.add(25.0, format!("Modest {:.1}% cash flow yield offers some value support", y))
            }
            Some(y) => component.add(
                -20.0,
                format!("Cash flow yield of {:.1}% is too thin to justify the price", y),
            ),
            None => component.add(
                -50.0,
                format!("{} lacks the productive capacity an intrinsic value estimate needs", context.asset),
            ),
        }

        match market.trend {
            Trend::StrongUptrend => {
                component.add(-10.0, "Momentum-driven pricing leaves little margin of safety")
            }
            Trend::StrongDowntrend => {
                component.add(10.0, "Price weakness widens the margin of safety")
            }
            _ => {}
        }

        component
    }

    fn evaluate_risk(&self, context: &AssetContext) -> ScoreComponent {
        let mut component = ScoreComponent::default();
        let volatility = context.market_data.volatility();

        if volatility < 0.2 {
            component.add(20.0, "Low realized volatility keeps capital at modest risk");
        } else if volatility > 0.6 {
            component.add(
                -50.0,
                format!("Volatility score of {:.2} is incompatible with capital preservation", volatility),
            );
        } else {
            component.add(-10.0, "Moderate volatility calls for a smaller position");
        }

        if let Some(flows) = context
            .market_data
            .fundamentals
            .institutional_inflows_musd
            .filter(|f| *f < 0.0)
        {
            component.add(-20.0, format!("Institutional outflows of {:.0}M add downside risk", flows.abs()));
        }

        component
    }
}

#[async_trait]
impl OpinionSource for ValueAssessor {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    async fn evaluate(&self, context: &AssetContext) -> EngineResult<Opinion> {
        let value = self.evaluate_value(context);
        let risk = self.evaluate_risk(context);
        let evidence = evidence_strength(context);

        let (score, mut rationale) = combine(&[(&value, 0.6), (&risk, 0.3), (&evidence, 0.1)]);

        let strength = evidence.score / 100.0;
        let adjusted = self.damping.apply(score, self.profile.bias, strength);
        let confidence = (0.4 + strength * 0.5).min(1.0);

        if evidence.score > 70.0 {
            rationale.push(
                "The evidence presented is substantial enough to weigh against a skeptical prior"
                    .to_string(),
            );
        }

        tracing::debug!(
            "🔎 {} scored {}: raw={:.1} adjusted={:.1} evidence={:.2}",
            self.profile.name,
            context.asset,
            score,
            adjusted,
            strength
        );

        Ok(Opinion::new(&self.profile.id, &context.asset, adjusted, confidence, rationale))
    }
}
