pub mod audit;
pub mod engine;

pub use audit::{AuditEntry, AuditEvent};
pub use engine::{ConsensusEngine, ConsensusResult, ContributingOpinion, Signal};
