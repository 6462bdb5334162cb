use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub tournament: TournamentConfig,
    pub scoring: ScoringConfig,
    pub leverage: LeverageConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Weight fraction that must agree in sign with the blended signal.
    pub consensus_threshold: f64,
    /// Signals at or above this confidence skip the source pool entirely.
    pub bypass_consensus_threshold: f64,
    /// Share of the original signal kept in the blend; the pool gets the rest.
    pub signal_blend_ratio: f64,
    /// Assets routed through the source pool. Empty means every asset.
    pub consensus_assets: Vec<String>,
    pub max_discussion_points: usize,
    /// Opinions below this confidence do not vote. Zero lets every opinion vote.
    pub vote_confidence_threshold: f64,
    /// Results below this confidence are flagged for a human look.
    pub review_confidence_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.6,
            bypass_consensus_threshold: 0.9,
            signal_blend_ratio: 0.3,
            consensus_assets: vec!["BTC".to_string(), "ETH".to_string()],
            max_discussion_points: 5,
            vote_confidence_threshold: 0.65,
            review_confidence_threshold: 0.5,
        }
    }
}

impl ConsensusConfig {
    pub fn covers(&self, asset: &str) -> bool {
        self.consensus_assets.is_empty()
            || self
                .consensus_assets
                .iter()
                .any(|a| a.eq_ignore_ascii_case(asset))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TournamentConfig {
    pub rebalance_period_secs: u64,
    pub max_weight_delta: f64,
    pub initial_weight: f64,
    pub min_weight: f64,
    pub adjustment_factor: f64,
    pub performance_decay_factor: f64,
    pub enable_rebalancing: bool,
    pub simulation_mode: bool,
    /// Per-source evaluation budget.
    pub source_timeout_ms: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            rebalance_period_secs: 3600,
            max_weight_delta: 0.05,
            initial_weight: 0.2,
            min_weight: 0.05,
            adjustment_factor: 0.8,
            performance_decay_factor: 0.9,
            enable_rebalancing: true,
            simulation_mode: true,
            source_timeout_ms: 2000,
        }
    }
}

impl TournamentConfig {
    pub fn rebalance_period(&self) -> Duration {
        Duration::from_secs(self.rebalance_period_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

/// Bias damping constants: `max(bias_floor, bias_ceiling - e * bias_evidence_slope)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub bias_ceiling: f64,
    pub bias_evidence_slope: f64,
    pub bias_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bias_ceiling: 0.3,
            bias_evidence_slope: 0.25,
            bias_floor: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LeverageConfig {
    pub min_leverage: f64,
    pub max_leverage: f64,
    pub default_leverage: f64,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            min_leverage: 1.0,
            max_leverage: 10.0,
            default_leverage: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub event_bus_capacity: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            event_bus_capacity: 256,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Reads `.env` (if present) and the process environment on top of defaults.
    pub fn from_env() -> EngineResult<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let consensus_assets = match env::var("CONSENSUS_ASSETS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.consensus.consensus_assets.clone(),
        };

        let config = Config {
            consensus: ConsensusConfig {
                consensus_threshold: env_or(
                    "CONSENSUS_THRESHOLD",
                    defaults.consensus.consensus_threshold,
                ),
                bypass_consensus_threshold: env_or(
                    "BYPASS_CONSENSUS_THRESHOLD",
                    defaults.consensus.bypass_consensus_threshold,
                ),
                signal_blend_ratio: env_or(
                    "SIGNAL_BLEND_RATIO",
                    defaults.consensus.signal_blend_ratio,
                ),
                consensus_assets,
                max_discussion_points: env_or(
                    "MAX_DISCUSSION_POINTS",
                    defaults.consensus.max_discussion_points,
                ),
                vote_confidence_threshold: env_or(
                    "VOTE_CONFIDENCE_THRESHOLD",
                    defaults.consensus.vote_confidence_threshold,
                ),
                review_confidence_threshold: env_or(
                    "REVIEW_CONFIDENCE_THRESHOLD",
                    defaults.consensus.review_confidence_threshold,
                ),
            },
            tournament: TournamentConfig {
                rebalance_period_secs: env_or(
                    "REBALANCE_PERIOD_SECS",
                    defaults.tournament.rebalance_period_secs,
                ),
                max_weight_delta: env_or("MAX_WEIGHT_DELTA", defaults.tournament.max_weight_delta),
                initial_weight: env_or("INITIAL_WEIGHT", defaults.tournament.initial_weight),
                min_weight: env_or("MIN_WEIGHT", defaults.tournament.min_weight),
                adjustment_factor: env_or(
                    "ADJUSTMENT_FACTOR",
                    defaults.tournament.adjustment_factor,
                ),
                performance_decay_factor: env_or(
                    "PERFORMANCE_DECAY_FACTOR",
                    defaults.tournament.performance_decay_factor,
                ),
                enable_rebalancing: env_or(
                    "ENABLE_REBALANCING",
                    defaults.tournament.enable_rebalancing,
                ),
                simulation_mode: env_or("SIMULATION_MODE", defaults.tournament.simulation_mode),
                source_timeout_ms: env_or(
                    "SOURCE_TIMEOUT_MS",
                    defaults.tournament.source_timeout_ms,
                ),
            },
            scoring: ScoringConfig {
                bias_ceiling: env_or("BIAS_CEILING", defaults.scoring.bias_ceiling),
                bias_evidence_slope: env_or(
                    "BIAS_EVIDENCE_SLOPE",
                    defaults.scoring.bias_evidence_slope,
                ),
                bias_floor: env_or("BIAS_FLOOR", defaults.scoring.bias_floor),
            },
            leverage: LeverageConfig {
                min_leverage: env_or("MIN_LEVERAGE", defaults.leverage.min_leverage),
                max_leverage: env_or("MAX_LEVERAGE", defaults.leverage.max_leverage),
                default_leverage: env_or("DEFAULT_LEVERAGE", defaults.leverage.default_leverage),
            },
            monitoring: MonitoringConfig {
                log_level: env::var("LOG_LEVEL").unwrap_or(defaults.monitoring.log_level),
                event_bus_capacity: env_or(
                    "EVENT_BUS_CAPACITY",
                    defaults.monitoring.event_bus_capacity,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML/JSON/YAML file, then applies `CONSENSUS__<SECTION>__<KEY>`
    /// environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("CONSENSUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        let config: Config = settings
            .try_deserialize()
            .context("configuration has an unexpected shape")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let c = &self.consensus;
        unit_interval("consensus_threshold", c.consensus_threshold, false)?;
        unit_interval("bypass_consensus_threshold", c.bypass_consensus_threshold, false)?;
        unit_interval("signal_blend_ratio", c.signal_blend_ratio, true)?;
        unit_interval("vote_confidence_threshold", c.vote_confidence_threshold, true)?;
        unit_interval("review_confidence_threshold", c.review_confidence_threshold, true)?;

        let t = &self.tournament;
        if t.rebalance_period_secs == 0 {
            return Err(EngineError::config("rebalance_period_secs must be positive"));
        }
        if t.source_timeout_ms == 0 {
            return Err(EngineError::config("source_timeout_ms must be positive"));
        }
        unit_interval("max_weight_delta", t.max_weight_delta, false)?;
        unit_interval("min_weight", t.min_weight, false)?;
        if t.min_weight >= 1.0 {
            return Err(EngineError::config("min_weight must be below 1"));
        }
        if !(t.min_weight..=1.0).contains(&t.initial_weight) {
            return Err(EngineError::config(format!(
                "initial_weight {} must lie in [min_weight {}, 1]",
                t.initial_weight, t.min_weight
            )));
        }
        if !t.adjustment_factor.is_finite() || t.adjustment_factor < 0.0 {
            return Err(EngineError::config("adjustment_factor must be a non-negative number"));
        }
        if !(0.0..1.0).contains(&t.performance_decay_factor) {
            return Err(EngineError::config("performance_decay_factor must lie in [0, 1)"));
        }

        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.bias_floor) || !(0.0..=1.0).contains(&s.bias_ceiling) {
            return Err(EngineError::config("bias_floor and bias_ceiling must lie in [0, 1]"));
        }
        if s.bias_floor > s.bias_ceiling {
            return Err(EngineError::config("bias_floor must not exceed bias_ceiling"));
        }
        if !s.bias_evidence_slope.is_finite() || s.bias_evidence_slope < 0.0 {
            return Err(EngineError::config("bias_evidence_slope must be non-negative"));
        }

        let l = &self.leverage;
        if !(l.min_leverage > 0.0 && l.min_leverage <= l.max_leverage) {
            return Err(EngineError::config(format!(
                "leverage bounds invalid: min {} max {}",
                l.min_leverage, l.max_leverage
            )));
        }
        if !(l.min_leverage..=l.max_leverage).contains(&l.default_leverage) {
            return Err(EngineError::config(format!(
                "default_leverage {} outside [{}, {}]",
                l.default_leverage, l.min_leverage, l.max_leverage
            )));
        }

        Ok(())
    }
}

fn unit_interval(name: &str, value: f64, allow_zero: bool) -> EngineResult<()> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if value.is_finite() && lower_ok && value <= 1.0 {
        Ok(())
    } else {
        Err(EngineError::config(format!("{} = {} is outside its valid range", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tournament.rebalance_period(), Duration::from_secs(3600));
        assert_eq!(config.consensus.bypass_consensus_threshold, 0.9);
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        let mut config = Config::default();
        config.consensus.consensus_threshold = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::Configuration(_))));

        let mut config = Config::default();
        config.tournament.initial_weight = 0.01;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.leverage.default_leverage = 20.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tournament.performance_decay_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.consensus.vote_confidence_threshold = 1.2;
        assert!(config.validate().is_err());
        config.consensus.vote_confidence_threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consensus_policy_coverage() {
        let mut consensus = ConsensusConfig::default();
        assert!(consensus.covers("btc"));
        assert!(!consensus.covers("SOL"));

        consensus.consensus_assets.clear();
        assert!(consensus.covers("SOL"));
    }
}
