pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod metrics;

pub use config::{
    Config, ConsensusConfig, LeverageConfig, MonitoringConfig, ScoringConfig, TournamentConfig,
};
pub use error::{EngineError, EngineResult};
pub use event_bus::{ConsensusEvent, EventBus};
pub use metrics::EngineMetrics;
