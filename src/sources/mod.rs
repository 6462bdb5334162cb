//! Pluggable opinion sources.
//!
//! Every source implements [`OpinionSource`]. Variants differ only in their
//! scoring sub-rules; the recommendation table and bias damping are shared
//! through [`scoring`].

pub mod innovation;
pub mod registry;
pub mod regulatory;
pub mod scoring;
pub mod value;

pub use innovation::InnovationAssessor;
pub use registry::{Collection, SourceFailure, SourceKind, SourceRegistry};
pub use regulatory::RegulatoryAssessor;
pub use scoring::{BiasDamping, ScoreComponent};
pub use value::ValueAssessor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{EngineError, EngineResult};
use crate::market::AssetContext;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Recommendation {
    /// Shared mapping from a [-100, 100] score to a recommendation.
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Recommendation::StrongBuy
        } else if score >= 25.0 {
            Recommendation::Buy
        } else if score > -25.0 {
            Recommendation::Neutral
        } else if score > -75.0 {
            Recommendation::Sell
        } else {
            Recommendation::StrongSell
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Recommendation::Neutral)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::StrongBuy => write!(f, "STRONG_BUY"),
            Recommendation::Buy => write!(f, "BUY"),
            Recommendation::Neutral => write!(f, "NEUTRAL"),
            Recommendation::Sell => write!(f, "SELL"),
            Recommendation::StrongSell => write!(f, "STRONG_SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeHorizon {
    Short,
    Medium,
    Long,
    VeryLong,
}

/// Static metadata of a registered source. Its weight lives in the
/// tournament's weight book, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub id: String,
    pub name: String,
    /// -100 (bearish) to 100 (bullish).
    pub bias: f64,
    /// 0 to 100.
    pub risk_tolerance: f64,
    pub time_horizon: TimeHorizon,
    pub focus_tags: Vec<String>,
    /// Conviction (0 to 100) the source acts on. Descriptive only; vote
    /// gating is an engine setting.
    pub signal_threshold: f64,
}

impl SourceProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bias: 0.0,
            risk_tolerance: 50.0,
            time_horizon: TimeHorizon::Medium,
            focus_tags: Vec::new(),
            signal_threshold: 50.0,
        }
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias.clamp(-100.0, 100.0);
        self
    }

    pub fn with_risk_tolerance(mut self, risk_tolerance: f64) -> Self {
        self.risk_tolerance = risk_tolerance.clamp(0.0, 100.0);
        self
    }

    pub fn with_time_horizon(mut self, time_horizon: TimeHorizon) -> Self {
        self.time_horizon = time_horizon;
        self
    }

    pub fn with_focus_tags(mut self, tags: &[&str]) -> Self {
        self.focus_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_signal_threshold(mut self, signal_threshold: f64) -> Self {
        self.signal_threshold = signal_threshold.clamp(0.0, 100.0);
        self
    }
}

/// One source's scored view on one asset for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opinion {
    pub source_id: String,
    pub asset: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub rationale: Vec<String>,
    /// Bias-adjusted score in [-100, 100] the recommendation was derived from.
    pub raw_score: f64,
}

impl Opinion {
    pub fn new(
        source_id: impl Into<String>,
        asset: impl Into<String>,
        raw_score: f64,
        confidence: f64,
        rationale: Vec<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            asset: asset.into(),
            recommendation: Recommendation::from_score(raw_score),
            confidence,
            rationale,
            raw_score,
        }
    }

    /// Rejects opinions a misbehaving source could hand back.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.raw_score.is_finite() || !(-100.0..=100.0).contains(&self.raw_score) {
            return Err(EngineError::source(
                &self.source_id,
                format!("score {} outside [-100, 100]", self.raw_score),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngineError::source(
                &self.source_id,
                format!("confidence {} outside [0, 1]", self.confidence),
            ));
        }
        Ok(())
    }
}

/// The single capability every opinion source provides.
///
/// Implementations must treat the context as read-only and must not touch
/// shared state; the registry runs them concurrently.
#[async_trait]
pub trait OpinionSource: Send + Sync {
    fn profile(&self) -> &SourceProfile;

    async fn evaluate(&self, context: &AssetContext) -> EngineResult<Opinion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_table_boundaries() {
        assert_eq!(Recommendation::from_score(100.0), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_score(75.0), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_score(74.9), Recommendation::Buy);
        assert_eq!(Recommendation::from_score(25.0), Recommendation::Buy);
        assert_eq!(Recommendation::from_score(24.9), Recommendation::Neutral);
        assert_eq!(Recommendation::from_score(-24.9), Recommendation::Neutral);
        assert_eq!(Recommendation::from_score(-25.0), Recommendation::Sell);
        assert_eq!(Recommendation::from_score(-74.9), Recommendation::Sell);
        assert_eq!(Recommendation::from_score(-75.0), Recommendation::StrongSell);
    }

    #[test]
    fn test_opinion_validation() {
        let ok = Opinion::new("a", "BTC", 40.0, 0.7, vec![]);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.recommendation, Recommendation::Buy);

        let mut bad = ok.clone();
        bad.raw_score = 140.0;
        assert!(bad.validate().is_err());

        let mut bad = ok;
        bad.confidence = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_recommendation_serializes_screaming_case() {
        let json = serde_json::to_string(&Recommendation::StrongSell).unwrap();
        assert_eq!(json, "\"STRONG_SELL\"");
        assert_eq!(Recommendation::StrongBuy.to_string(), "STRONG_BUY");
    }
}
