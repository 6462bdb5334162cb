pub mod consensus;
pub mod core;
pub mod market;
pub mod sources;
pub mod tournament;
pub mod trading;

pub use crate::consensus::{ConsensusEngine, ConsensusResult, Signal};
pub use crate::core::{Config, EngineError, EngineResult};
pub use crate::sources::{Opinion, OpinionSource, Recommendation, SourceProfile};
pub use crate::tournament::TournamentScheduler;
