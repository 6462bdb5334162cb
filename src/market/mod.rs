use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything an opinion source may look at for one asset in one cycle.
/// Shared read-only between sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetContext {
    pub asset: String,
    pub market_data: MarketData,
    pub research: ResearchArtifacts,
}

impl AssetContext {
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into().to_uppercase(),
            market_data: MarketData::default(),
            research: ResearchArtifacts::default(),
        }
    }

    pub fn with_market_data(mut self, market_data: MarketData) -> Self {
        self.market_data = market_data;
        self
    }

    pub fn with_research(mut self, research: ResearchArtifacts) -> Self {
        self.research = research;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Trend {
    StrongUptrend,
    Uptrend,
    #[default]
    Sideways,
    Downtrend,
    StrongDowntrend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub price: f64,
    pub trend: Trend,
    /// Oldest first.
    pub historical_prices: Vec<f64>,
    /// Move realized after the cycle's decision point, in percent.
    /// Filled by the feed when known; drives simulated outcomes.
    pub realized_return_pct: Option<f64>,
    pub sentiment: Option<Sentiment>,
    pub fundamentals: Fundamentals,
    pub timestamp: DateTime<Utc>,
}

impl Default for MarketData {
    fn default() -> Self {
        Self {
            price: 0.0,
            trend: Trend::Sideways,
            historical_prices: Vec::new(),
            realized_return_pct: None,
            sentiment: None,
            fundamentals: Fundamentals::default(),
            timestamp: Utc::now(),
        }
    }
}

impl MarketData {
    /// Standard deviation of simple returns scaled onto [0, 1]; a 5% daily
    /// deviation saturates the scale.
    pub fn volatility(&self) -> f64 {
        let returns: Vec<f64> = self
            .historical_prices
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();

        if returns.is_empty() {
            return 0.0;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;

        (variance.sqrt() * 20.0).min(1.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sentiment {
    /// -1.0 (bearish) to 1.0 (bullish).
    pub score: f64,
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub adoption_growth_pct: Option<f64>,
    pub institutional_adoption_pct: Option<f64>,
    pub institutional_inflows_musd: Option<f64>,
    pub new_institutional_entities: u32,
    pub cash_flow_yield_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchArtifacts {
    pub source_count: usize,
    pub peer_reviewed: bool,
    pub backtest_years: Option<u32>,
    pub statistical_significance: Option<f64>,
}
