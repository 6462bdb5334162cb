use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::consensus::ConsensusResult;
use crate::tournament::{LeaderboardEntry, SchedulerState, WeightSnapshot};

/// Feed for dashboards and reporting collaborators. Fill reporters publish
/// `OutcomeReported`; everything else is emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsensusEvent {
    ConsensusComputed(Box<ConsensusResult>),
    SourceExcluded {
        source_id: String,
        asset: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    WeightsRebalanced(WeightSnapshot),
    LeaderboardPublished {
        cycle_id: u64,
        entries: Vec<LeaderboardEntry>,
        timestamp: DateTime<Utc>,
    },
    SchedulerStateChanged {
        state: SchedulerState,
        timestamp: DateTime<Utc>,
    },
    /// Realized PnL of a source's call on an asset, from a real fill.
    OutcomeReported {
        source_id: String,
        asset: String,
        pnl: f64,
        timestamp: DateTime<Utc>,
    },
}

pub struct EventBus {
    sender: broadcast::Sender<ConsensusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishing without subscribers is not an error; the event is dropped.
    pub fn publish(&self, event: ConsensusEvent) {
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!("📡 Event published to {} receivers", receivers);
            }
            Err(_) => {
                tracing::trace!("No subscribers for event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
