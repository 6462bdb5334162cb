//! Performance tournament: sources earn weight by being right.

pub mod outcomes;
pub mod performance;
pub mod scheduler;
pub mod weights;

pub use outcomes::{ContextFeed, OutcomeProvider, ReportedOutcomes, SimulatedOutcomes, StaticFeed};
pub use performance::{PerformanceRecord, PerformanceTracker};
pub use scheduler::{CycleReport, LeaderboardEntry, SchedulerState, TournamentScheduler};
pub use weights::{project_onto_simplex, WeightBook, WeightRebalancer, WeightSnapshot, WeightState};
