use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::{MarketData, Trend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeParams {
    pub asset: String,
    /// Notional size of the proposed position.
    pub size: f64,
    /// Account equity the size is measured against.
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    pub fn from_score(total_risk: f64) -> Self {
        if total_risk < 0.3 {
            RiskLevel::Low
        } else if total_risk < 0.6 {
            RiskLevel::Medium
        } else if total_risk < 0.8 {
            RiskLevel::High
        } else {
            RiskLevel::Extreme
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Extreme => write!(f, "extreme"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub recommended_leverage: f64,
    pub total_risk: f64,
    pub risk_level: RiskLevel,
}

impl RiskAssessment {
    pub fn is_safe(&self) -> bool {
        self.risk_level != RiskLevel::Extreme
    }
}

/// Collaborator that sizes leverage for a proposed trade.
#[cfg_attr(test, mockall::automock)]
pub trait RiskAssessor: Send + Sync {
    fn assess_trade(&self, trade: &TradeParams, market: &MarketData, average_confidence: f64) -> RiskAssessment;
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub volatility_weight: f64,      // Weight of realized volatility
    pub market_weight: f64,          // Weight of the trend factor
    pub position_size_weight: f64,   // Weight of position size vs cap
    pub open_risk_weight: f64,       // Weight of risk already on the book
    pub max_position_size_pct: f64,  // 15% of equity per position
    pub max_leverage: f64,
    pub min_history: usize,          // Prices needed before volatility counts
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            volatility_weight: 0.25,
            market_weight: 0.25,
            position_size_weight: 0.20,
            open_risk_weight: 0.30,
            max_position_size_pct: 0.15,
            max_leverage: 5.0,
            min_history: 14,
        }
    }
}

/// Volatility, trend and position-size driven leverage sizing.
#[derive(Debug)]
pub struct VolatilityRiskAssessor {
    config: RiskConfig,
    open_risk: f64,
}

impl VolatilityRiskAssessor {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            open_risk: 0.0,
        }
    }

    /// Risk already carried by open positions, as a fraction of equity.
    pub fn with_open_risk(mut self, open_risk: f64) -> Self {
        self.open_risk = open_risk.max(0.0);
        self
    }

    fn volatility_risk(&self, market: &MarketData) -> f64 {
        if market.historical_prices.len() < self.config.min_history {
            return 0.5; // Not enough data
        }
        market.volatility()
    }

    fn market_factor(trend: Trend) -> f64 {
        match trend {
            Trend::StrongUptrend | Trend::Uptrend => 0.8,
            Trend::Sideways => 1.0,
            Trend::Downtrend | Trend::StrongDowntrend => 1.2,
        }
    }
}

impl Default for VolatilityRiskAssessor {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskAssessor for VolatilityRiskAssessor {
    fn assess_trade(&self, trade: &TradeParams, market: &MarketData, average_confidence: f64) -> RiskAssessment {
        let position_pct = if trade.equity > 0.0 {
            trade.size / trade.equity
        } else {
            0.0
        };

        let volatility_risk = self.volatility_risk(market) * self.config.volatility_weight;
        let market_risk = Self::market_factor(market.trend) * self.config.market_weight;
        let position_risk =
            (position_pct / self.config.max_position_size_pct) * self.config.position_size_weight;
        let current_risk = self.open_risk * self.config.open_risk_weight;

        let total_risk = volatility_risk + market_risk + position_risk + current_risk;

        let adjusted_confidence = (average_confidence * (1.0 - total_risk)).max(0.0);
        let max = self.config.max_leverage;
        let safe_leverage = (1.0 + (max - 1.0) * adjusted_confidence).min(max);

        // Round down to 0.5 steps
        let recommended_leverage = (safe_leverage * 2.0).floor() / 2.0;

        tracing::debug!(
            "📊 Risk for {}: total={:.3} (vol={:.3} market={:.3} size={:.3} open={:.3}), leverage={}x",
            trade.asset,
            total_risk,
            volatility_risk,
            market_risk,
            position_risk,
            current_risk,
            recommended_leverage
        );

        RiskAssessment {
            recommended_leverage,
            total_risk,
            risk_level: RiskLevel::from_score(total_risk),
        }
    }
}
